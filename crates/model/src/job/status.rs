use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one shard item.
///
/// ```text
/// Preparing -> ExecuteInventoryTask -> ExecuteIncrementalTask
///           -> ExecuteIncrementalTaskCompleted -> Finished
/// ```
///
/// Any state except `Finished` may move to `Stopped`; a stopped item resumes
/// into the state it was stopped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Preparing,
    ExecuteInventoryTask,
    ExecuteIncrementalTask,
    ExecuteIncrementalTaskCompleted,
    Finished,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Preparing => "PREPARING",
            JobStatus::ExecuteInventoryTask => "EXECUTE_INVENTORY_TASK",
            JobStatus::ExecuteIncrementalTask => "EXECUTE_INCREMENTAL_TASK",
            JobStatus::ExecuteIncrementalTaskCompleted => "EXECUTE_INCREMENTAL_TASK_COMPLETED",
            JobStatus::Finished => "FINISHED",
            JobStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished)
    }

    /// Whether the item is still moving data (dumper and importer running).
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobStatus::Preparing
                | JobStatus::ExecuteInventoryTask
                | JobStatus::ExecuteIncrementalTask
        )
    }

    /// Forward transitions plus stop. Resume (`Stopped -> stopped_from`) is
    /// handled by the progress record, which knows where the item came from.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Finished, _) => false,
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Preparing, ExecuteInventoryTask) => true,
            (ExecuteInventoryTask, ExecuteIncrementalTask) => true,
            (ExecuteIncrementalTask, ExecuteIncrementalTaskCompleted) => true,
            (ExecuteIncrementalTaskCompleted, Finished) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::JobStatus::*;

    #[test]
    fn forward_path_is_allowed() {
        assert!(Preparing.can_transition_to(ExecuteInventoryTask));
        assert!(ExecuteInventoryTask.can_transition_to(ExecuteIncrementalTask));
        assert!(ExecuteIncrementalTask.can_transition_to(ExecuteIncrementalTaskCompleted));
        assert!(ExecuteIncrementalTaskCompleted.can_transition_to(Finished));
    }

    #[test]
    fn skipping_or_reversing_is_rejected() {
        assert!(!Preparing.can_transition_to(ExecuteIncrementalTask));
        assert!(!ExecuteIncrementalTask.can_transition_to(ExecuteInventoryTask));
        assert!(!ExecuteIncrementalTask.can_transition_to(Finished));
    }

    #[test]
    fn finished_is_terminal() {
        assert!(!Finished.can_transition_to(Stopped));
        assert!(Finished.is_terminal());
        assert!(ExecuteIncrementalTaskCompleted.can_transition_to(Stopped));
    }
}
