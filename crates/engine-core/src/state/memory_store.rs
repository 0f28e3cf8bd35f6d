use crate::{
    error::StateStoreError,
    state::{StateStore, accepts},
};
use async_trait::async_trait;
use model::{check::JobCheckResult, core::identifiers::ShardItem, job::progress::JobItemProgress};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Process-local state store.
#[derive(Default)]
pub struct MemoryStateStore {
    progress: Mutex<BTreeMap<(String, ShardItem), JobItemProgress>>,
    checks: Mutex<BTreeMap<String, JobCheckResult>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_progress(&self, progress: &JobItemProgress) -> Result<(), StateStoreError> {
        let key = (progress.job_id.to_string(), progress.shard_item);
        let mut guard = self.progress.lock();
        if let Some(existing) = guard.get(&key) {
            if !accepts(existing, progress) {
                return Ok(());
            }
        }
        guard.insert(key, progress.clone());
        Ok(())
    }

    async fn load_progress(
        &self,
        job_id: &str,
        shard_item: ShardItem,
    ) -> Result<Option<JobItemProgress>, StateStoreError> {
        Ok(self
            .progress
            .lock()
            .get(&(job_id.to_string(), shard_item))
            .cloned())
    }

    async fn list_progress(&self, job_id: &str) -> Result<Vec<JobItemProgress>, StateStoreError> {
        Ok(self
            .progress
            .lock()
            .iter()
            .filter(|((job, _), _)| job == job_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn list_jobs(&self) -> Result<Vec<String>, StateStoreError> {
        let jobs: BTreeSet<String> = self
            .progress
            .lock()
            .keys()
            .map(|(job, _)| job.clone())
            .collect();
        Ok(jobs.into_iter().collect())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StateStoreError> {
        self.progress.lock().retain(|(job, _), _| job != job_id);
        self.checks.lock().remove(job_id);
        Ok(())
    }

    async fn save_check_result(
        &self,
        job_id: &str,
        result: &JobCheckResult,
    ) -> Result<(), StateStoreError> {
        self.checks
            .lock()
            .insert(job_id.to_string(), result.clone());
        Ok(())
    }

    async fn load_check_result(
        &self,
        job_id: &str,
    ) -> Result<Option<JobCheckResult>, StateStoreError> {
        Ok(self.checks.lock().get(job_id).cloned())
    }

    async fn delete_check_result(&self, job_id: &str) -> Result<(), StateStoreError> {
        self.checks.lock().remove(job_id);
        Ok(())
    }
}
