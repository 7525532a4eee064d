//! Core traits for the rule engine.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::message::Message;

/// An automation rule.
///
/// The engine reads `topics()` once per start to build the subscription set,
/// then calls `handle_message` once per matching inbound message. Invocations
/// of the same rule may overlap across messages; a rule that keeps state across
/// messages must guard it itself.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Human-readable identifier. Diagnostics only, not required to be unique.
    fn name(&self) -> &str;

    /// Topic filters this rule wants delivered.
    fn topics(&self) -> Vec<String>;

    /// Handle one inbound message. Derived messages go out through `feedback`;
    /// an error is logged against the rule and affects nothing else.
    async fn handle_message(&self, topic: &str, payload: &[u8], feedback: &Feedback)
        -> Result<()>;
}

/// Emission side channel handed to every rule invocation.
///
/// Cheap to clone, so a rule can move it into its own task and emit later.
/// Emitting never blocks: the queue behind it is unbounded and drained by the
/// engine's single publisher.
#[derive(Debug, Clone)]
pub struct Feedback {
    tx: UnboundedSender<Message>,
}

impl Feedback {
    pub(crate) fn new(tx: UnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Queue a message for publishing. Returns `false` when the engine has
    /// already shut its feedback loop down and the message was dropped.
    pub fn emit(&self, message: Message) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %e.0.topic, "Feedback loop closed, dropping emitted message");
                false
            }
        }
    }

    /// Detached sender for tests and tools that drive rules without an engine.
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}
