use connectors::error::{ConnectorError, DbError};
use engine_config::error::ConfigError;
use engine_core::error::StateStoreError;
use engine_runtime::error::JobError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid job configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("State store error: {0}")]
    Store(#[from] StateStoreError),

    #[error("Job failed: {0}")]
    Job(#[from] JobError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("No state recorded for job '{0}'")]
    UnknownJob(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
