use connectors::error::{ConnectorError, DbError};
use engine_config::error::ConfigError;
use engine_core::error::{AlgorithmError, StateStoreError};
use engine_processing::error::{CheckError, DumperError, ImporterError, ProgressError};
use model::core::identifiers::ShardItem;
use thiserror::Error;

/// Fatal errors of one shard item. They stop the item, never its siblings.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Importer(#[from] ImporterError),

    #[error("Dumper failed: {0}")]
    Dumper(#[from] DumperError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("No table metadata for source table '{0}'")]
    MissingMetadata(String),

    #[error("Incremental capture is not available for {0} sources")]
    IncrementalUnsupported(String),

    #[error("Dumper ended without a finished record")]
    UnexpectedEnd,

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors of job-level operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("State store error: {0}")]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("Consistency check failed: {0}")]
    Check(#[from] CheckError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Shard item {shard_item} failed: {source}")]
    Pipeline {
        shard_item: ShardItem,
        #[source]
        source: PipelineError,
    },

    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Job '{0}' is already finished")]
    AlreadyFinished(String),

    #[error("No source configured for shard item {0}")]
    MissingSource(ShardItem),

    #[error("Job '{job_id}' has shard items that are not completed: {items:?}")]
    NotCompleted {
        job_id: String,
        items: Vec<ShardItem>,
    },

    #[error("Job '{0}' has no consistency check result")]
    CheckMissing(String),

    #[error("Consistency check of job '{0}' did not match")]
    CheckNotMatched(String),

    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
