use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use casa_rules::{ConnectOptions, EngineConfig, MatchPolicy, ShutdownPolicy};

use crate::error::HostError;

/// Host configuration.
///
/// Loaded from an optional TOML file (path in `CASA_CONFIG`), then
/// overridden by environment variables. Connection details other than the
/// credentials are fixed to the local broker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub mqtt: MqttConfig,
    pub rules: RulesConfig,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesConfig {
    pub match_policy: MatchPolicy,
    pub shutdown_policy: ShutdownPolicy,
    pub rule_timeout_ms: Option<u64>,
}

impl HostConfig {
    /// Load `.env`, the optional config file, then env overrides.
    pub fn load() -> Result<Self, HostError> {
        dotenvy::dotenv().ok();

        let mut config = match env::var("CASA_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path).map_err(|source| HostError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, HostError> {
        Ok(toml::from_str(content)?)
    }

    /// Env vars:
    /// - `MQTT_USER`: broker user; credentials are only sent when set
    /// - `MQTT_PASS`: broker password (optional)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(user) = lookup("MQTT_USER").filter(|v| !v.is_empty()) {
            self.mqtt.user = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.mqtt.pass = Some(pass);
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let options = ConnectOptions::local();
        match &self.mqtt.user {
            Some(user) => options.with_credentials(user.clone(), self.mqtt.pass.clone()),
            None => options,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            match_policy: self.rules.match_policy,
            shutdown_policy: self.rules.shutdown_policy,
            rule_timeout: self.rules.rule_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn log_redacted(&self) {
        info!("Config loaded:");
        info!("  MQTT broker: {}", self.connect_options().redacted_uri());
        info!("  Match policy: {:?}", self.rules.match_policy);
        info!("  Shutdown policy: {:?}", self.rules.shutdown_policy);
        match self.rules.rule_timeout_ms {
            Some(ms) => info!("  Rule timeout: {ms}ms"),
            None => info!("  Rule timeout: <none>"),
        }
    }
}
