use crate::{
    error::StateStoreError,
    state::{StateStore, accepts},
};
use async_trait::async_trait;
use model::{check::JobCheckResult, core::identifiers::ShardItem, job::progress::JobItemProgress};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::{collections::BTreeSet, path::Path};

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Helper to generate consistent keys for progress records.
    /// The item is zero padded so a prefix scan returns items in order.
    #[inline]
    fn prg_key(job_id: &str, shard_item: ShardItem) -> String {
        format!("prg:{}:{:010}", job_id, shard_item)
    }

    #[inline]
    fn prg_prefix(job_id: &str) -> String {
        format!("prg:{}:", job_id)
    }

    #[inline]
    fn chk_key(job_id: &str) -> String {
        format!("chk:{}", job_id)
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn save_progress(&self, progress: &JobItemProgress) -> Result<(), StateStoreError> {
        let key = Self::prg_key(progress.job_id.as_str(), progress.shard_item);
        let new_bytes = bincode::serialize(progress)?;

        // Check-then-set inside a transaction so two writers for the same item
        // cannot interleave between the read and the insert.
        let result = self
            .db
            .transaction::<_, _, StateStoreError>(|tx_db| {
                if let Some(existing_bytes) = tx_db.get(&key)? {
                    let existing: JobItemProgress = bincode::deserialize(&existing_bytes)
                        .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;

                    if !accepts(&existing, progress) {
                        // Stale write, skipped on purpose.
                        return Ok(());
                    }
                }

                tx_db.insert(key.as_bytes(), new_bytes.as_slice())?;
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }

        self.db.flush_async().await?;
        Ok(())
    }

    async fn load_progress(
        &self,
        job_id: &str,
        shard_item: ShardItem,
    ) -> Result<Option<JobItemProgress>, StateStoreError> {
        match self.db.get(Self::prg_key(job_id, shard_item))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_progress(&self, job_id: &str) -> Result<Vec<JobItemProgress>, StateStoreError> {
        let mut items = Vec::new();
        for item in self.db.scan_prefix(Self::prg_prefix(job_id)) {
            let (_key, value) = item?;
            items.push(bincode::deserialize(&value)?);
        }
        Ok(items)
    }

    async fn list_jobs(&self) -> Result<Vec<String>, StateStoreError> {
        let mut jobs = BTreeSet::new();
        for item in self.db.scan_prefix("prg:") {
            let (_key, value) = item?;
            let progress: JobItemProgress = bincode::deserialize(&value)?;
            jobs.insert(progress.job_id.to_string());
        }
        Ok(jobs.into_iter().collect())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), StateStoreError> {
        let mut batch = sled::Batch::default();
        for item in self.db.scan_prefix(Self::prg_prefix(job_id)) {
            let (key, _) = item?;
            batch.remove(key);
        }
        batch.remove(Self::chk_key(job_id).as_bytes());
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn save_check_result(
        &self,
        job_id: &str,
        result: &JobCheckResult,
    ) -> Result<(), StateStoreError> {
        let value = bincode::serialize(result)?;
        self.db.insert(Self::chk_key(job_id), value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn load_check_result(
        &self,
        job_id: &str,
    ) -> Result<Option<JobCheckResult>, StateStoreError> {
        match self.db.get(Self::chk_key(job_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete_check_result(&self, job_id: &str) -> Result<(), StateStoreError> {
        self.db.remove(Self::chk_key(job_id))?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::{identifiers::JobId, value::Value},
        job::status::JobStatus,
        position::Position,
    };
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn mk_progress(job: &str, item: ShardItem, status: JobStatus, lsn: u64) -> JobItemProgress {
        let mut p = JobItemProgress::new(JobId::new(job), item);
        p.status = status;
        p.position = Position::Log { lsn };
        p
    }

    #[tokio::test]
    async fn round_trips_progress_with_inventory_position() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();

        let mut p = mk_progress("j1", 3, JobStatus::ExecuteInventoryTask, 0);
        p.position = Position::PrimaryKey {
            table: "t_order".into(),
            after: vec![Value::Int(42), Value::from("b")],
        };
        p.incremental_start = Some(Position::Log { lsn: 9 });
        store.save_progress(&p).await.unwrap();

        let loaded = store.load_progress("j1", 3).await.unwrap().unwrap();
        assert_eq!(loaded, p);
        assert!(store.load_progress("j1", 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ignores_stale_position_from_superseded_writer() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();

        store
            .save_progress(&mk_progress("j1", 0, JobStatus::ExecuteIncrementalTask, 50))
            .await
            .unwrap();
        store
            .save_progress(&mk_progress("j1", 0, JobStatus::ExecuteIncrementalTask, 40))
            .await
            .unwrap();

        let loaded = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(loaded.position, Position::Log { lsn: 50 });
    }

    #[tokio::test]
    async fn lists_items_in_order_and_isolates_jobs() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();

        for item in [10, 2, 1] {
            store
                .save_progress(&mk_progress("j1", item, JobStatus::Preparing, 0))
                .await
                .unwrap();
        }
        store
            .save_progress(&mk_progress("j10", 0, JobStatus::Preparing, 0))
            .await
            .unwrap();

        let items: Vec<_> = store
            .list_progress("j1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.shard_item)
            .collect();
        assert_eq!(items, vec![1, 2, 10]);
        assert_eq!(store.list_jobs().await.unwrap(), vec!["j1", "j10"]);
    }

    #[tokio::test]
    async fn delete_job_removes_progress_and_check_result() {
        let dir = tempdir().unwrap();
        let store = SledStateStore::open(dir.path()).unwrap();

        store
            .save_progress(&mk_progress("j1", 0, JobStatus::Preparing, 0))
            .await
            .unwrap();
        let check = JobCheckResult {
            matched: true,
            algorithm: "COUNT".into(),
            tables: BTreeMap::from([("t_order".to_string(), true)]),
            checked_at: chrono::Utc::now(),
        };
        store.save_check_result("j1", &check).await.unwrap();
        assert_eq!(store.load_check_result("j1").await.unwrap(), Some(check));

        store.delete_job("j1").await.unwrap();
        assert!(store.list_progress("j1").await.unwrap().is_empty());
        assert!(store.load_check_result("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopened_store_keeps_progress() {
        let dir = tempdir().unwrap();
        {
            let store = SledStateStore::open(dir.path()).unwrap();
            store
                .save_progress(&mk_progress("j1", 0, JobStatus::ExecuteIncrementalTask, 7))
                .await
                .unwrap();
        }
        let store = SledStateStore::open(dir.path()).unwrap();
        let loaded = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(loaded.position, Position::Log { lsn: 7 });
    }
}
