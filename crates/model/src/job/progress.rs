use crate::{
    core::identifiers::{JobId, ShardItem},
    error::TransitionError,
    job::status::JobStatus,
    position::Position,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable checkpoint of one shard item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItemProgress {
    pub job_id: JobId,
    pub shard_item: ShardItem,
    pub status: JobStatus,
    /// Everything at or before this position has been committed to the target.
    pub position: Position,
    /// Log position captured before the inventory scan started.
    pub incremental_start: Option<Position>,
    pub processed_record_count: u64,
    pub last_update_time: DateTime<Utc>,
    pub stopped_from: Option<JobStatus>,
    pub error_message: Option<String>,
}

impl JobItemProgress {
    pub fn new(job_id: JobId, shard_item: ShardItem) -> Self {
        Self {
            job_id,
            shard_item,
            status: JobStatus::Preparing,
            position: Position::Placeholder,
            incremental_start: None,
            processed_record_count: 0,
            last_update_time: Utc::now(),
            stopped_from: None,
            error_message: None,
        }
    }

    /// Records a committed batch.
    pub fn advance(&mut self, position: Position, applied: u64) {
        self.position = position;
        self.processed_record_count += applied;
        self.last_update_time = Utc::now();
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to: next,
            });
        }
        if next == JobStatus::Stopped {
            self.stopped_from = Some(self.status);
        }
        self.status = next;
        self.last_update_time = Utc::now();
        Ok(())
    }

    /// Moves to `Stopped`, remembering where to resume and why it stopped.
    pub fn stop(&mut self, error: Option<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Stopped)?;
        self.error_message = error;
        Ok(())
    }

    /// Returns a stopped item to the state it was stopped from. The persisted
    /// position is kept, so capture replays from it.
    pub fn resume(&mut self) -> Result<JobStatus, TransitionError> {
        let Some(previous) = self.stopped_from.filter(|_| self.status == JobStatus::Stopped)
        else {
            return Err(TransitionError::NotStopped(self.status));
        };
        self.status = previous;
        self.stopped_from = None;
        self.error_message = None;
        self.last_update_time = Utc::now();
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> JobItemProgress {
        JobItemProgress::new(JobId::new("j1"), 0)
    }

    #[test]
    fn advance_accumulates_count() {
        let mut p = progress();
        p.advance(Position::Log { lsn: 10 }, 3);
        p.advance(Position::Log { lsn: 12 }, 2);
        assert_eq!(p.position, Position::Log { lsn: 12 });
        assert_eq!(p.processed_record_count, 5);
    }

    #[test]
    fn stop_then_resume_returns_to_previous_state() {
        let mut p = progress();
        p.transition(JobStatus::ExecuteInventoryTask).unwrap();
        p.stop(Some("boom".into())).unwrap();
        assert_eq!(p.status, JobStatus::Stopped);
        assert_eq!(p.stopped_from, Some(JobStatus::ExecuteInventoryTask));
        assert_eq!(p.error_message.as_deref(), Some("boom"));

        assert_eq!(p.resume().unwrap(), JobStatus::ExecuteInventoryTask);
        assert_eq!(p.status, JobStatus::ExecuteInventoryTask);
        assert!(p.error_message.is_none());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut p = progress();
        let err = p.transition(JobStatus::Finished).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: JobStatus::Preparing,
                to: JobStatus::Finished
            }
        );
        assert_eq!(p.status, JobStatus::Preparing);
    }

    #[test]
    fn resume_requires_stopped_item() {
        let mut p = progress();
        assert!(matches!(p.resume(), Err(TransitionError::NotStopped(_))));
    }
}
