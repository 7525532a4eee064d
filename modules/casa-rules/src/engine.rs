//! The dispatch loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{BusClient, ConnectOptions, InboundHandler};
use crate::error::{BusResult, EngineError, EngineResult};
use crate::message::Message;
use crate::registry::RuleRegistry;
use crate::topic;
use crate::traits::{Feedback, Rule};

/// Which rules see an inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Only rules with a topic filter matching the message topic.
    #[default]
    Filtered,
    /// Every rule sees every message on any subscribed topic and filters
    /// for itself.
    Broadcast,
}

/// What the feedback drain does with queued messages on stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Publish everything already queued, then exit.
    #[default]
    Drain,
    /// Exit at once; queued messages are dropped.
    Immediate,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub match_policy: MatchPolicy,
    pub shutdown_policy: ShutdownPolicy,
    /// Abandon a rule invocation after this long. `None` lets a hung rule
    /// run forever; it leaks its task but blocks nothing else.
    pub rule_timeout: Option<Duration>,
}

/// A rule with the topic filters it reported at start.
#[derive(Clone)]
struct Subscriber {
    rule: Arc<dyn Rule>,
    filters: Arc<[String]>,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic::matches(f, topic))
    }
}

/// One engine run, from a successful start to stop.
struct Run {
    live: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    drain: JoinHandle<()>,
}

struct State {
    registry: RuleRegistry,
    run: Option<Run>,
}

/// Bridges the bus to the registered rules and back.
///
/// Inbound messages fan out to one task per (message, rule). Rules emit
/// derived messages through their [`Feedback`] handle; a single drain task
/// publishes them in FIFO order, so the bus only ever has one writer on
/// behalf of rules.
pub struct Engine {
    bus: Arc<dyn BusClient>,
    config: EngineConfig,
    state: Mutex<State>,
}

impl Engine {
    pub fn new(registry: RuleRegistry, bus: Arc<dyn BusClient>) -> Self {
        Self {
            bus,
            config: EngineConfig::default(),
            state: Mutex::new(State {
                registry,
                run: None,
            }),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Add a rule. Only allowed while the engine is stopped; the rule list
    /// is frozen for the duration of a run.
    pub async fn register(&self, rule: impl Rule + 'static) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if state.run.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        state.registry.register(rule);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.run.is_some()
    }

    pub async fn rule_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Connect, wire inbound delivery to the rules, and subscribe to every
    /// topic the rules asked for.
    ///
    /// Fails with [`EngineError::Connection`] if the bus is unreachable and
    /// with [`EngineError::Subscription`] if any subscription is refused; in
    /// both cases nothing is left running.
    pub async fn start(&self, options: &ConnectOptions) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if state.run.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let subscribers: Arc<[Subscriber]> = state
            .registry
            .rules()
            .iter()
            .map(|rule| Subscriber {
                filters: rule.topics().into(),
                rule: Arc::clone(rule),
            })
            .collect();

        // Feedback loop first, so nothing a rule emits is ever lost.
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let drain = tokio::spawn(drain_feedback(
            Arc::clone(&self.bus),
            rx,
            shutdown_rx,
            self.config.shutdown_policy,
        ));

        info!(
            uri = %options.redacted_uri(),
            rules = subscribers.len(),
            "Connecting rules engine to bus"
        );
        if let Err(e) = self.bus.connect(options).await {
            drain.abort();
            error!(error = %e, "Unable to connect to bus");
            return Err(EngineError::Connection(e));
        }

        let live = Arc::new(AtomicBool::new(true));
        self.bus.set_inbound_handler(inbound_handler(
            Arc::clone(&subscribers),
            Feedback::new(tx),
            Arc::clone(&live),
            self.config.clone(),
        ));

        for sub in subscribers.iter() {
            for filter in sub.filters.iter() {
                if let Err(source) = self.bus.subscribe(filter).await {
                    live.store(false, Ordering::Release);
                    drain.abort();
                    if let Err(e) = self.bus.close().await {
                        warn!(error = %e, "Failed to close bus after subscription error");
                    }
                    return Err(EngineError::Subscription {
                        topic: filter.clone(),
                        source,
                    });
                }
                debug!(rule = sub.rule.name(), topic = %filter, "Subscribed");
            }
        }

        state.run = Some(Run {
            live,
            shutdown: shutdown_tx,
            drain,
        });
        info!(rules = subscribers.len(), "Rules engine started");
        Ok(())
    }

    /// Detach from inbound traffic, stop the feedback drain according to the
    /// shutdown policy, then close the bus. Only the close error propagates.
    pub async fn stop(&self) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        let run = state.run.take().ok_or(EngineError::NotRunning)?;

        run.live.store(false, Ordering::Release);
        let _ = run.shutdown.send(());
        if let Err(e) = run.drain.await {
            warn!(error = %e, "Feedback drain task ended abnormally");
        }

        self.bus.close().await.map_err(EngineError::Close)?;
        info!("Rules engine stopped");
        Ok(())
    }
}

/// Build the callback the bus invokes per delivery. Never blocks: it only
/// spawns rule invocations onto the runtime that started the engine.
fn inbound_handler(
    subscribers: Arc<[Subscriber]>,
    feedback: Feedback,
    live: Arc<AtomicBool>,
    config: EngineConfig,
) -> InboundHandler {
    let runtime = Handle::current();

    Arc::new(move |delivery: BusResult<Message>| {
        if !live.load(Ordering::Acquire) {
            debug!("Engine stopped, ignoring inbound delivery");
            return;
        }

        let message = match delivery {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Bus delivery error");
                return;
            }
        };

        let message = Arc::new(message);
        for sub in subscribers.iter() {
            if config.match_policy == MatchPolicy::Filtered && !sub.wants(&message.topic) {
                continue;
            }

            let span = info_span!("rule", rule = sub.rule.name(), topic = %message.topic);
            runtime.spawn(
                invoke(
                    Arc::clone(&sub.rule),
                    Arc::clone(&message),
                    feedback.clone(),
                    config.rule_timeout,
                )
                .instrument(span),
            );
        }
    })
}

async fn invoke(
    rule: Arc<dyn Rule>,
    message: Arc<Message>,
    feedback: Feedback,
    timeout: Option<Duration>,
) {
    let handling = rule.handle_message(&message.topic, &message.payload, &feedback);

    let result = match timeout {
        None => handling.await,
        Some(limit) => match tokio::time::timeout(limit, handling).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    rule = rule.name(),
                    timeout = ?limit,
                    "Rule invocation timed out, abandoning it"
                );
                return;
            }
        },
    };

    if let Err(e) = result {
        error!(rule = rule.name(), error = %e, "Error executing rule");
    }
}

/// Single consumer of the feedback channel and the only publisher on
/// behalf of rules.
async fn drain_feedback(
    bus: Arc<dyn BusClient>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut shutdown: oneshot::Receiver<()>,
    policy: ShutdownPolicy,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = rx.recv() => match next {
                Some(message) => publish(bus.as_ref(), message).await,
                None => return,
            },
        }
    }

    if policy == ShutdownPolicy::Drain {
        let mut drained = 0usize;
        while let Ok(message) = rx.try_recv() {
            publish(bus.as_ref(), message).await;
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Published queued feedback on shutdown");
        }
    }
}

async fn publish(bus: &dyn BusClient, message: Message) {
    let topic = message.topic.clone();
    match bus.publish(message).await {
        Ok(()) => debug!(topic = %topic, "Published feedback message"),
        Err(e) => error!(topic = %topic, error = %e, "Failed to publish feedback message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    #[tokio::test]
    async fn register_is_rejected_while_running() {
        struct Noop;

        #[async_trait::async_trait]
        impl Rule for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            fn topics(&self) -> Vec<String> {
                vec!["a".into()]
            }
            async fn handle_message(&self, _: &str, _: &[u8], _: &Feedback) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let bus = Arc::new(MemoryBus::new());
        let engine = Engine::new(RuleRegistry::new(), bus.clone());
        engine.register(Noop).await.unwrap();
        engine.start(&ConnectOptions::local()).await.unwrap();

        assert!(matches!(
            engine.register(Noop).await,
            Err(EngineError::AlreadyRunning)
        ));
        assert!(matches!(
            engine.start(&ConnectOptions::local()).await,
            Err(EngineError::AlreadyRunning)
        ));

        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
        engine.register(Noop).await.unwrap();
        assert_eq!(engine.rule_count().await, 2);
    }

    #[tokio::test]
    async fn stop_without_start_is_an_error() {
        let engine = Engine::new(RuleRegistry::new(), Arc::new(MemoryBus::new()));
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }

    #[test]
    fn policies_parse_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            m: MatchPolicy,
            s: ShutdownPolicy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"m":"broadcast","s":"immediate"}"#).unwrap();
        assert_eq!(w.m, MatchPolicy::Broadcast);
        assert_eq!(w.s, ShutdownPolicy::Immediate);
    }
}
