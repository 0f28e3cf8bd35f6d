use connectors::error::DbError;
use engine_core::error::{AlgorithmError, StateStoreError};
use model::{error::TransitionError, records::record::RecordType};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel push cancelled")]
    Cancelled,

    #[error("Channel closed")]
    Closed,
}

/// Two changes of the same row that cannot follow each other. Always a
/// capture ordering bug, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ordering violation on table '{table}' key {key}: {earlier} followed by {later} ({reason})")]
pub struct MergeError {
    pub table: String,
    pub key: String,
    pub earlier: RecordType,
    pub later: RecordType,
    pub reason: &'static str,
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("State store operation failed: {0}")]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Error, Debug)]
pub enum ImporterError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("No table metadata for source table '{0}'")]
    MissingMetadata(String),

    #[error("Failed to build statement for table '{table}': {source}")]
    Build {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Batch of {statements} statements on '{table}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        table: String,
        statements: usize,
        attempts: usize,
        #[source]
        source: DbError,
    },

    #[error("Failed to write batch to table '{table}': {source}")]
    WriteBatch {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to save progress: {0}")]
    Progress(#[from] ProgressError),
}

#[derive(Error, Debug)]
pub enum DumperError {
    #[error("Failed to read table '{table}': {source}")]
    Read {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("No table metadata for source table '{0}'")]
    MissingMetadata(String),

    #[error("Cannot resume from position {0}")]
    InvalidPosition(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Failed to read {side} table '{table}': {source}")]
    Read {
        side: &'static str,
        table: String,
        #[source]
        source: DbError,
    },

    #[error("No table metadata for source table '{0}'")]
    MissingMetadata(String),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),

    #[error("Consistency check cancelled")]
    Cancelled,
}
