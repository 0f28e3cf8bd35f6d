use crate::error::ProgressError;
use engine_core::state::StateStore;
use model::{
    core::identifiers::{JobId, ShardItem},
    job::{progress::JobItemProgress, status::JobStatus},
    position::Position,
};
use std::sync::Arc;
use tracing::info;

/// Owns the progress record of one shard item and persists every change.
pub struct ProgressTracker {
    progress: JobItemProgress,
    store: Arc<dyn StateStore>,
}

impl ProgressTracker {
    /// Loads the persisted progress of the item or starts a fresh one.
    pub async fn load_or_create(
        job_id: &JobId,
        shard_item: ShardItem,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, ProgressError> {
        let progress = match store.load_progress(job_id.as_str(), shard_item).await? {
            Some(progress) => {
                info!(
                    status = %progress.status,
                    position = %progress.position,
                    processed = progress.processed_record_count,
                    "Resuming from persisted progress"
                );
                progress
            }
            None => {
                info!("No persisted progress found, starting from the beginning");
                let progress = JobItemProgress::new(job_id.clone(), shard_item);
                store.save_progress(&progress).await?;
                progress
            }
        };
        Ok(Self { progress, store })
    }

    pub fn progress(&self) -> &JobItemProgress {
        &self.progress
    }

    pub fn status(&self) -> JobStatus {
        self.progress.status
    }

    pub fn position(&self) -> &Position {
        &self.progress.position
    }

    /// Records a batch that is already committed on the target.
    pub async fn commit_batch(&mut self, position: Position, applied: u64) -> Result<(), ProgressError> {
        self.progress.advance(position, applied);
        self.persist().await
    }

    pub async fn transition(&mut self, next: JobStatus) -> Result<(), ProgressError> {
        let from = self.progress.status;
        self.progress.transition(next)?;
        self.persist().await?;
        info!(from = %from, to = %next, "Job item status changed");
        Ok(())
    }

    /// Moves to the next phase and resets the position to `start`.
    pub async fn begin_phase(&mut self, next: JobStatus, start: Position) -> Result<(), ProgressError> {
        let from = self.progress.status;
        self.progress.transition(next)?;
        self.progress.position = start;
        self.persist().await?;
        info!(from = %from, to = %next, position = %self.progress.position, "Job item phase started");
        Ok(())
    }

    pub async fn set_incremental_start(&mut self, position: Position) -> Result<(), ProgressError> {
        self.progress.incremental_start = Some(position);
        self.persist().await
    }

    pub async fn stop(&mut self, error: Option<String>) -> Result<(), ProgressError> {
        if self.progress.status == JobStatus::Stopped {
            return Ok(());
        }
        self.progress.stop(error)?;
        self.persist().await?;
        info!(
            stopped_from = ?self.progress.stopped_from,
            error = ?self.progress.error_message,
            "Job item stopped"
        );
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<JobStatus, ProgressError> {
        let status = self.progress.resume()?;
        self.persist().await?;
        info!(status = %status, position = %self.progress.position, "Job item resumed");
        Ok(status)
    }

    async fn persist(&self) -> Result<(), ProgressError> {
        self.store.save_progress(&self.progress).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::memory_store::MemoryStateStore;
    use model::core::value::Value;

    #[tokio::test]
    async fn persists_every_change_and_reloads() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let job = JobId::new("j1");

        let mut tracker = ProgressTracker::load_or_create(&job, 0, store.clone())
            .await
            .unwrap();
        tracker
            .begin_phase(
                JobStatus::ExecuteInventoryTask,
                Position::PrimaryKey {
                    table: "t".into(),
                    after: vec![],
                },
            )
            .await
            .unwrap();
        tracker
            .commit_batch(
                Position::PrimaryKey {
                    table: "t".into(),
                    after: vec![Value::Int(10)],
                },
                10,
            )
            .await
            .unwrap();

        let reloaded = ProgressTracker::load_or_create(&job, 0, store).await.unwrap();
        assert_eq!(reloaded.status(), JobStatus::ExecuteInventoryTask);
        assert_eq!(reloaded.progress().processed_record_count, 10);
        assert_eq!(reloaded.progress(), tracker.progress());
    }

    #[tokio::test]
    async fn stop_and_resume_round_trip_through_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let job = JobId::new("j1");
        let mut tracker = ProgressTracker::load_or_create(&job, 1, store.clone())
            .await
            .unwrap();

        tracker.stop(Some("boom".into())).await.unwrap();
        tracker.stop(None).await.unwrap();
        let stored = store.load_progress("j1", 1).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Stopped);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));

        assert_eq!(tracker.resume().await.unwrap(), JobStatus::Preparing);
        let stored = store.load_progress("j1", 1).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Preparing);
    }

    #[tokio::test]
    async fn illegal_transition_is_not_persisted() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut tracker = ProgressTracker::load_or_create(&JobId::new("j1"), 0, store.clone())
            .await
            .unwrap();

        assert!(matches!(
            tracker.transition(JobStatus::Finished).await,
            Err(ProgressError::Transition(_))
        ));
        let stored = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Preparing);
    }
}
