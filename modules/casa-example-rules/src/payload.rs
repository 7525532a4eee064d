//! Payload comparator rule.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use casa_rules::{Feedback, Message, Rule};

/// Payload emitted when a comparator fires.
pub const TRIGGERED: &str = "triggered!";

/// Remembers the last payload seen on each watched topic and fires when
/// every watched topic holds its expected payload.
///
/// Fires again on every later message for which the condition still holds.
pub struct PayloadRule {
    name: String,
    output_topic: String,
    expected: Vec<(String, Vec<u8>)>,
    last_seen: Mutex<HashMap<String, Vec<u8>>>,
}

impl PayloadRule {
    pub fn new(name: impl Into<String>, output_topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output_topic: output_topic.into(),
            expected: Vec::new(),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Watch `topic` and require its latest payload to equal `payload`.
    pub fn when(mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.expected.push((topic.into(), payload.into()));
        self
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    fn watches(&self, topic: &str) -> bool {
        self.expected.iter().any(|(t, _)| t == topic)
    }
}

#[async_trait]
impl Rule for PayloadRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> Vec<String> {
        self.expected.iter().map(|(t, _)| t.clone()).collect()
    }

    async fn handle_message(&self, topic: &str, payload: &[u8], feedback: &Feedback) -> Result<()> {
        // The engine may broadcast; ignore topics this rule does not watch.
        if !self.watches(topic) {
            return Ok(());
        }

        let fired = {
            let mut last_seen = self
                .last_seen
                .lock()
                .map_err(|_| anyhow!("payload state poisoned"))?;
            last_seen.insert(topic.to_string(), payload.to_vec());
            self.expected
                .iter()
                .all(|(t, want)| last_seen.get(t).is_some_and(|got| got == want))
        };

        if fired {
            debug!(rule = %self.name, "Condition met");
            feedback.emit(Message::new(self.output_topic.clone(), TRIGGERED));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double() -> PayloadRule {
        PayloadRule::new("double", "out/double")
            .when("a", "1")
            .when("b", "2")
    }

    #[tokio::test]
    async fn fires_once_all_topics_hold_expected_payloads() {
        let rule = double();
        let (feedback, mut rx) = Feedback::channel();

        rule.handle_message("a", b"1", &feedback).await.unwrap();
        assert!(rx.try_recv().is_err());

        rule.handle_message("b", b"2", &feedback).await.unwrap();
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "out/double");
        assert_eq!(msg.payload, TRIGGERED.as_bytes());
    }

    #[tokio::test]
    async fn later_payload_change_clears_condition() {
        let rule = double();
        let (feedback, mut rx) = Feedback::channel();

        rule.handle_message("a", b"1", &feedback).await.unwrap();
        rule.handle_message("b", b"2", &feedback).await.unwrap();
        rx.try_recv().unwrap();

        rule.handle_message("a", b"0", &feedback).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ignores_unwatched_topics() {
        let rule = double();
        let (feedback, mut rx) = Feedback::channel();

        rule.handle_message("c", b"1", &feedback).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(rule.last_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn topics_follow_declaration_order() {
        assert_eq!(double().topics(), vec!["a", "b"]);
    }
}
