//! Named services the host starts and stops as a unit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::HostConfig;
use crate::error::HostError;

/// A long-running part of the process, started and stopped by the host.
#[async_trait]
pub trait Service: Send + Sync {
    /// Fixed name the service registers under.
    fn name(&self) -> &str;

    async fn start(&self, config: &HostConfig) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Services in registration order. Names are unique.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: impl Service + 'static) -> Result<(), HostError> {
        self.register_arc(Arc::new(service))
    }

    pub fn register_arc(&mut self, service: Arc<dyn Service>) -> Result<(), HostError> {
        if self.services.iter().any(|s| s.name() == service.name()) {
            return Err(HostError::DuplicateService(service.name().to_string()));
        }
        self.services.push(service);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Start every service in registration order. If one fails, the ones
    /// already started are stopped again (in reverse) before returning.
    pub async fn start_all(&self, config: &HostConfig) -> Result<(), HostError> {
        for (i, service) in self.services.iter().enumerate() {
            info!(service = service.name(), "Starting service");
            if let Err(e) = service.start(config).await {
                error!(service = service.name(), error = %e, "Service failed to start");
                for started in self.services[..i].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        error!(service = started.name(), error = %stop_err, "Rollback stop failed");
                    }
                }
                return Err(HostError::Start {
                    name: service.name().to_string(),
                    source: e.into(),
                });
            }
        }
        Ok(())
    }

    /// Stop every service in reverse registration order. Keeps going past
    /// failures and returns the first one.
    pub async fn stop_all(&self) -> Result<(), HostError> {
        let mut first_err = None;
        for service in self.services.iter().rev() {
            info!(service = service.name(), "Stopping service");
            if let Err(e) = service.stop().await {
                error!(service = service.name(), error = %e, "Service failed to stop");
                if first_err.is_none() {
                    first_err = Some(HostError::Stop {
                        name: service.name().to_string(),
                        source: e.into(),
                    });
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
