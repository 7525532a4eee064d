//! Rule dispatch engine for a home-automation message bus.
//!
//! Subscribes to the topics the registered rules ask for, fans every inbound
//! message out to the interested rules concurrently, and republishes whatever
//! the rules emit through a single feedback drain.
//!
//! Consumers implement [`Rule`], collect rules in a [`RuleRegistry`], and hand
//! both the registry and a [`BusClient`] to an [`Engine`].

pub mod bus;
pub mod engine;
pub mod error;
pub mod message;
pub mod registry;
pub mod topic;
pub mod traits;

pub use bus::{BusClient, ConnectOptions, Credentials, InboundHandler, MemoryBus};
pub use engine::{Engine, EngineConfig, MatchPolicy, ShutdownPolicy};
pub use error::{BusError, BusResult, EngineError, EngineResult};
pub use message::Message;
pub use registry::RuleRegistry;
pub use traits::{Feedback, Rule};
