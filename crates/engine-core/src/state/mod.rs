use crate::error::StateStoreError;
use async_trait::async_trait;
use model::{
    check::JobCheckResult,
    core::identifiers::ShardItem,
    job::{progress::JobItemProgress, status::JobStatus},
};

pub mod memory_store;
pub mod sled_store;

/// Durable storage for shard item progress and consistency check results.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persists `progress`, unless the stored record is newer (see [`accepts`]).
    async fn save_progress(&self, progress: &JobItemProgress) -> Result<(), StateStoreError>;

    async fn load_progress(
        &self,
        job_id: &str,
        shard_item: ShardItem,
    ) -> Result<Option<JobItemProgress>, StateStoreError>;

    /// All items of a job, ordered by shard item.
    async fn list_progress(&self, job_id: &str) -> Result<Vec<JobItemProgress>, StateStoreError>;

    async fn list_jobs(&self) -> Result<Vec<String>, StateStoreError>;

    /// Removes every progress record and the check result of a job.
    async fn delete_job(&self, job_id: &str) -> Result<(), StateStoreError>;

    async fn save_check_result(
        &self,
        job_id: &str,
        result: &JobCheckResult,
    ) -> Result<(), StateStoreError>;

    async fn load_check_result(&self, job_id: &str)
    -> Result<Option<JobCheckResult>, StateStoreError>;

    async fn delete_check_result(&self, job_id: &str) -> Result<(), StateStoreError>;
}

/// Whether `incoming` may replace `existing`.
///
/// A finished item is frozen. Within the same status the position never moves
/// backwards, so a late write from a superseded importer is dropped.
pub fn accepts(existing: &JobItemProgress, incoming: &JobItemProgress) -> bool {
    if existing.status == JobStatus::Finished {
        return incoming.status == JobStatus::Finished;
    }
    if existing.status == incoming.status {
        return !matches!(
            existing.position.partial_cmp(&incoming.position),
            Some(std::cmp::Ordering::Greater)
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::identifiers::JobId, position::Position};

    fn progress(status: JobStatus, lsn: u64) -> JobItemProgress {
        let mut p = JobItemProgress::new(JobId::new("j1"), 0);
        p.status = status;
        p.position = Position::Log { lsn };
        p
    }

    #[test]
    fn stale_position_is_rejected() {
        let existing = progress(JobStatus::ExecuteIncrementalTask, 20);
        assert!(!accepts(&existing, &progress(JobStatus::ExecuteIncrementalTask, 10)));
        assert!(accepts(&existing, &progress(JobStatus::ExecuteIncrementalTask, 20)));
        assert!(accepts(&existing, &progress(JobStatus::ExecuteIncrementalTask, 30)));
    }

    #[test]
    fn status_changes_are_always_written() {
        let existing = progress(JobStatus::ExecuteIncrementalTask, 20);
        assert!(accepts(&existing, &progress(JobStatus::Stopped, 20)));
    }

    #[test]
    fn finished_items_are_frozen() {
        let existing = progress(JobStatus::Finished, 20);
        assert!(!accepts(&existing, &progress(JobStatus::Stopped, 20)));
    }
}
