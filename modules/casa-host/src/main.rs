use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use casa_host::{HostConfig, RulesService, ServiceRegistry};
use casa_mqtt::MqttBus;
use casa_rules::{Engine, RuleRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("casa=info".parse()?))
        .init();

    info!("Casa rules host starting...");

    // Load config
    let config = HostConfig::load()?;
    config.log_redacted();

    // Collect rules
    let mut rules = RuleRegistry::new();
    casa_example_rules::register_all(&mut rules);
    info!(rules = ?rules, "Rules registered");

    let engine = Engine::new(rules, Arc::new(MqttBus::new())).with_config(config.engine_config());

    let mut services = ServiceRegistry::new();
    services.register(RulesService::new(engine))?;
    services.start_all(&config).await?;

    info!(services = ?services.names(), "Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    services.stop_all().await?;
    Ok(())
}
