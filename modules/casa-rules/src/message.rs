//! Messages flowing on the bus.

use std::fmt;

/// A single bus message: topic, raw payload and the retain flag.
///
/// Used in both directions: inbound (bus → engine) and feedback
/// (rule → engine → bus).
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl Message {
    /// A non-retained message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Payload as UTF-8, lossy. For logging and simple comparisons.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload", &self.payload_str())
            .field("retained", &self.retained)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_not_retained() {
        let msg = Message::new("a/b", "on");
        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.payload, b"on".to_vec());
        assert!(!msg.retained);
        assert!(msg.retained(true).retained);
    }

    #[test]
    fn debug_shows_payload_as_text() {
        let msg = Message::new("a/b", "triggered!");
        assert!(format!("{msg:?}").contains("triggered!"));
    }
}
