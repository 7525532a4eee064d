use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    ParseConfig(#[from] toml::de::Error),

    #[error("Service '{0}' is already registered")]
    DuplicateService(String),

    #[error("Service '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Service '{name}' failed to stop: {source}")]
    Stop {
        name: String,
        #[source]
        source: BoxError,
    },
}
