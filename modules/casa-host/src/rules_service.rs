use async_trait::async_trait;

use casa_rules::Engine;

use crate::config::HostConfig;
use crate::service::Service;

/// Name the rules engine registers under.
pub const SERVICE_NAME: &str = "rules";

/// Runs the rules engine as a host service.
pub struct RulesService {
    engine: Engine,
}

impl RulesService {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

#[async_trait]
impl Service for RulesService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn start(&self, config: &HostConfig) -> anyhow::Result<()> {
        self.engine.start(&config.connect_options()).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.engine.stop().await?;
        Ok(())
    }
}
