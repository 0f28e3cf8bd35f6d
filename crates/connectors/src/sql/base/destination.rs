use crate::{error::DbError, sql::base::statement::Statement};
use async_trait::async_trait;

/// Prefix reserved for job-scoped temporary objects on the target.
pub fn temporary_object_prefix(job_id: &str) -> String {
    format!("__shardmig_{job_id}_")
}

#[async_trait]
pub trait TargetDataSource: Send + Sync {
    /// Applies every statement in one transaction and returns the number of
    /// affected rows. Either all statements take effect or none do.
    async fn execute_batch(&self, statements: &[Statement]) -> Result<u64, DbError>;

    /// Drops the temporary objects created on behalf of `job_id`.
    async fn cleanup(&self, job_id: &str) -> Result<(), DbError>;
}
