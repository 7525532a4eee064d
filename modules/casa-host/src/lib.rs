pub mod config;
pub mod error;
pub mod rules_service;
pub mod service;

pub use config::HostConfig;
pub use error::HostError;
pub use rules_service::{RulesService, SERVICE_NAME};
pub use service::{Service, ServiceRegistry};
