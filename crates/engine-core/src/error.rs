use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode or decode state: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Failed to save progress for {job_id}/{shard_item}: {message}")]
    SaveProgress {
        job_id: String,
        shard_item: u32,
        message: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("Unknown {kind} algorithm: {name}")]
    Unknown { kind: &'static str, name: String },

    #[error("Invalid property '{key}' for algorithm {name}: {message}")]
    InvalidProperty {
        name: String,
        key: String,
        message: String,
    },
}
