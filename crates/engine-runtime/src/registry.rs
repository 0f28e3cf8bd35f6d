use crate::{error::JobError, job::MigrationJob};
use model::core::identifiers::JobId;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

/// Jobs known to this process, owned by whoever drives them.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<JobId, Arc<MigrationJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: MigrationJob) -> Result<Arc<MigrationJob>, JobError> {
        let mut jobs = self.jobs.write();
        let job_id = job.job_id().clone();
        if jobs.contains_key(&job_id) {
            return Err(JobError::AlreadyRegistered(job_id.to_string()));
        }
        let job = Arc::new(job);
        jobs.insert(job_id, job.clone());
        Ok(job)
    }

    pub fn get(&self, job_id: &JobId) -> Result<Arc<MigrationJob>, JobError> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn remove(&self, job_id: &JobId) -> Option<Arc<MigrationJob>> {
        self.jobs.write().remove(job_id)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
