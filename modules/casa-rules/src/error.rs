//! Typed errors for the bus seam and the engine lifecycle.

use thiserror::Error;

/// Errors reported by a bus client.
#[derive(Debug, Error)]
pub enum BusError {
    /// Broker could not be reached or refused the connection
    #[error("bus unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    /// Operation requires an open connection
    #[error("bus client is not connected")]
    NotConnected,

    /// Broker rejected a subscription
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// Publish could not be handed to the transport
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Transport-level failure while receiving
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Connection did not close cleanly
    #[error("close failed: {0}")]
    Close(String),
}

/// Errors returned by the dispatch engine's lifecycle operations.
///
/// Only setup-time failures surface here; steady-state failures (delivery
/// errors, rule errors, publish errors) are logged and recovered locally.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bus connection could not be established
    #[error("unable to connect to bus: {0}")]
    Connection(#[source] BusError),

    /// A required topic filter could not be subscribed
    #[error("unable to subscribe to topic {topic}: {source}")]
    Subscription {
        topic: String,
        #[source]
        source: BusError,
    },

    /// Bus connection did not close cleanly on stop
    #[error("unable to close bus connection: {0}")]
    Close(#[source] BusError),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,
}

/// Result type alias for engine lifecycle operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for bus client operations.
pub type BusResult<T> = std::result::Result<T, BusError>;
