use crate::job::status::JobStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal job status transition: {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("Job item is not stopped (status: {0})")]
    NotStopped(JobStatus),
}
