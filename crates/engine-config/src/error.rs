use engine_core::error::AlgorithmError;
use thiserror::Error;

/// Errors raised while loading or validating a job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),
}
