//! In-process bus for tests and local runs.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{BusClient, ConnectOptions, InboundHandler};
use crate::error::{BusError, BusResult};
use crate::message::Message;
use crate::topic;

// ---------------------------------------------------------------------------
// MemoryBus (tests, no broker required)
// ---------------------------------------------------------------------------

/// Broker-less bus. Records subscriptions and publishes, and lets the caller
/// inject inbound deliveries. Only topics matching an active subscription are
/// delivered, the way a broker would route them. Thread-safe.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
    published_notify: Notify,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    unreachable: bool,
    rejected: HashSet<String>,
    failing_publish: HashSet<String>,
    subscriptions: Vec<String>,
    published: Vec<Message>,
    handler: Option<InboundHandler>,
    close_count: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose `connect` always fails.
    pub fn unreachable() -> Self {
        let bus = Self::default();
        bus.inner().unreachable = true;
        bus
    }

    /// Make `subscribe(topic)` fail.
    pub fn reject_subscription(self, topic: impl Into<String>) -> Self {
        self.inner().rejected.insert(topic.into());
        self
    }

    /// Make `publish` to `topic` fail.
    pub fn fail_publish(self, topic: impl Into<String>) -> Self {
        self.inner().failing_publish.insert(topic.into());
        self
    }

    /// Inject an inbound message. Returns whether a handler received it.
    pub fn deliver(&self, message: Message) -> bool {
        let handler = {
            let inner = self.inner();
            let subscribed = inner
                .subscriptions
                .iter()
                .any(|f| topic::matches(f, &message.topic));
            match (&inner.handler, inner.connected && subscribed) {
                (Some(h), true) => h.clone(),
                _ => return false,
            }
        };
        handler(Ok(message));
        true
    }

    /// Inject a transport-level delivery failure.
    pub fn deliver_error(&self, reason: impl Into<String>) -> bool {
        let handler = {
            let inner = self.inner();
            match (&inner.handler, inner.connected) {
                (Some(h), true) => h.clone(),
                _ => return false,
            }
        };
        handler(Err(BusError::Delivery(reason.into())));
        true
    }

    pub fn is_connected(&self) -> bool {
        self.inner().connected
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Message> {
        self.inner().published.clone()
    }

    pub fn close_count(&self) -> usize {
        self.inner().close_count
    }

    /// Wait until at least `count` messages were published or `timeout`
    /// elapses, then return everything published so far.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> Vec<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.published_notify.notified();
            {
                let inner = self.inner();
                if inner.published.len() >= count {
                    return inner.published.clone();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.published();
            }
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn connect(&self, options: &ConnectOptions) -> BusResult<()> {
        let mut inner = self.inner();
        if inner.unreachable {
            return Err(BusError::Unreachable {
                address: options.address(),
                reason: "connection refused".to_string(),
            });
        }
        inner.connected = true;
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> BusResult<()> {
        let mut inner = self.inner();
        if !inner.connected {
            return Err(BusError::NotConnected);
        }
        if inner.rejected.contains(filter) || !topic::is_valid_filter(filter) {
            return Err(BusError::Subscribe {
                topic: filter.to_string(),
                reason: "not authorized".to_string(),
            });
        }
        inner.subscriptions.push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, message: Message) -> BusResult<()> {
        {
            let mut inner = self.inner();
            if !inner.connected {
                return Err(BusError::NotConnected);
            }
            if inner.failing_publish.contains(&message.topic) {
                return Err(BusError::Publish {
                    topic: message.topic,
                    reason: "rejected by broker".to_string(),
                });
            }
            inner.published.push(message);
        }
        self.published_notify.notify_waiters();
        Ok(())
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        self.inner().handler = Some(handler);
    }

    async fn close(&self) -> BusResult<()> {
        let mut inner = self.inner();
        inner.connected = false;
        inner.handler = None;
        inner.subscriptions.clear();
        inner.close_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handler() -> (InboundHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: InboundHandler = Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test]
    async fn delivers_only_subscribed_topics() {
        let bus = MemoryBus::new();
        let (handler, count) = counting_handler();
        bus.connect(&ConnectOptions::local()).await.unwrap();
        bus.set_inbound_handler(handler);
        bus.subscribe("home/+/temp").await.unwrap();

        assert!(bus.deliver(Message::new("home/kitchen/temp", "21")));
        assert!(!bus.deliver(Message::new("home/kitchen/humidity", "40")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_bus_refuses_connect() {
        let bus = MemoryBus::unreachable();
        let err = bus.connect(&ConnectOptions::local()).await.unwrap_err();
        assert!(matches!(err, BusError::Unreachable { .. }));
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn close_detaches_handler() {
        let bus = MemoryBus::new();
        let (handler, count) = counting_handler();
        bus.connect(&ConnectOptions::local()).await.unwrap();
        bus.set_inbound_handler(handler);
        bus.subscribe("#").await.unwrap();
        bus.close().await.unwrap();

        assert!(!bus.deliver(Message::new("a", "b")));
        assert!(!bus.deliver_error("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(bus.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let bus = MemoryBus::new();
        let err = bus.publish(Message::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, BusError::NotConnected));
    }

    #[tokio::test]
    async fn wait_for_published_returns_on_timeout() {
        let bus = MemoryBus::new();
        let got = bus.wait_for_published(1, Duration::from_millis(20)).await;
        assert!(got.is_empty());
    }
}
