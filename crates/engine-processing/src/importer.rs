//! Applies captured records to the target.
//!
//! Each fetched window is merged, translated into statements and executed in
//! homogeneous batches. Progress is persisted only after the target commit,
//! so a crash replays at most the last window.

use crate::{
    channel::RecordReceiver,
    error::ImporterError,
    merger,
    progress::ProgressTracker,
    retry::classify_db_error,
};
use connectors::{
    metadata::provider::TableMetadataProvider,
    sql::base::{builder::SqlBuilder, destination::TargetDataSource, statement::Statement},
};
use engine_config::settings::pipeline::PipelineConfig;
use engine_core::{
    error::AlgorithmError,
    metrics::Metrics,
    rate_limit::RateLimitAlgorithm,
    retry::{RetryError, RetryPolicy},
};
use model::records::record::{DataRecord, Record};
use std::{sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// A `Finished` record was applied.
    Finished,
    /// The cancel token fired between batches.
    Stopped,
    /// The channel is closed and empty.
    Drained,
}

#[derive(Clone)]
pub struct ImporterSettings {
    pub batch_size: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limiter: Option<Arc<dyn RateLimitAlgorithm>>,
}

impl ImporterSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, AlgorithmError> {
        let rate_limiter = config
            .write
            .rate_limiter
            .as_ref()
            .map(|limiter| limiter.rate_limiter())
            .transpose()?;
        Ok(Self {
            batch_size: config.write.batch_size.max(1),
            fetch_timeout: config.fetch_timeout(),
            retry: config.write.retry_policy(),
            rate_limiter,
        })
    }
}

pub struct Importer {
    receiver: RecordReceiver,
    target: Arc<dyn TargetDataSource>,
    metadata: Arc<dyn TableMetadataProvider>,
    builder: Arc<dyn SqlBuilder>,
    settings: ImporterSettings,
    metrics: Metrics,
    batch_seq: u64,
}

impl Importer {
    pub fn new(
        receiver: RecordReceiver,
        target: Arc<dyn TargetDataSource>,
        metadata: Arc<dyn TableMetadataProvider>,
        builder: Arc<dyn SqlBuilder>,
        settings: ImporterSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            receiver,
            target,
            metadata,
            builder,
            settings,
            metrics,
            batch_seq: 0,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Consumes the channel until a `Finished` record, cancellation, or a
    /// drained channel. Errors are fatal for the shard item.
    pub async fn run(
        &mut self,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, ImporterError> {
        loop {
            let records = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Importer stopped");
                    return Ok(ImportOutcome::Stopped);
                }
                records = self
                    .receiver
                    .fetch_records(self.settings.batch_size, self.settings.fetch_timeout) => records,
            };

            if records.is_empty() {
                if self.receiver.is_drained() {
                    info!("Channel drained, importer exiting");
                    return Ok(ImportOutcome::Drained);
                }
                continue;
            }

            let finished = records.iter().any(Record::is_finished);
            self.process_window(records, tracker).await?;

            if finished {
                info!(
                    position = %tracker.position(),
                    processed = tracker.progress().processed_record_count,
                    "Importer reached finished record"
                );
                return Ok(ImportOutcome::Finished);
            }
        }
    }

    /// Merges, writes and checkpoints one fetched window.
    pub async fn process_window(
        &mut self,
        records: Vec<Record>,
        tracker: &mut ProgressTracker,
    ) -> Result<(), ImporterError> {
        self.batch_seq += 1;
        let batch = self.batch_seq;
        let start = Instant::now();

        let position = records
            .iter()
            .rev()
            .map(Record::position)
            .find(|p| !p.is_placeholder())
            .cloned();
        let data: Vec<DataRecord> = records
            .into_iter()
            .filter_map(|record| match record {
                Record::Data(data) => Some(data),
                _ => None,
            })
            .collect();
        let received = data.len() as u64;

        debug!(batch, records = received, "Processing batch");

        let statements = match self.build_statements(data) {
            Ok(statements) => statements,
            Err(e) => {
                error!(batch, error = %e, "Failed to prepare batch");
                self.metrics.increment_failures(1);
                return Err(e);
            }
        };

        let mut applied = 0u64;
        for chunk in chunk_by_shape(&statements, self.settings.batch_size) {
            if let Err(e) = self.execute_chunk(chunk).await {
                error!(
                    batch,
                    table = %chunk[0].table,
                    error = %e,
                    "Failed to write batch after retries"
                );
                self.metrics.increment_failures(1);
                return Err(e);
            }
            applied += chunk.len() as u64;
        }

        // Only now is the window durable on the target.
        if let Some(position) = position {
            tracker.commit_batch(position, received).await?;
        }

        let duration = start.elapsed();
        self.metrics.increment_received(received);
        self.metrics.increment_records(applied);
        self.metrics.increment_batches(1);
        self.metrics.record_batch_duration(duration);

        if received > 0 {
            info!(
                batch,
                records = received,
                statements = applied,
                position = %tracker.position(),
                duration_ms = duration.as_millis() as u64,
                "Batch processed successfully"
            );
        }
        Ok(())
    }

    fn build_statements(&self, data: Vec<DataRecord>) -> Result<Vec<Statement>, ImporterError> {
        let groups = merger::group(data)?;

        let mut statements = Vec::new();
        for group in &groups {
            let meta = self
                .metadata
                .metadata_for_source(&group.table_name)
                .ok_or_else(|| ImporterError::MissingMetadata(group.table_name.clone()))?;

            for record in group.iter() {
                let statement =
                    self.builder
                        .build(record, &meta)
                        .map_err(|source| ImporterError::Build {
                            table: meta.name.clone(),
                            source,
                        })?;
                statements.extend(statement);
            }
        }
        Ok(statements)
    }

    async fn execute_chunk(&self, chunk: &[Statement]) -> Result<u64, ImporterError> {
        if let Some(limiter) = &self.settings.rate_limiter {
            limiter.acquire(chunk.len()).await;
        }

        let bytes: usize = chunk
            .iter()
            .flat_map(|s| s.params.iter())
            .map(|v| v.size_bytes())
            .sum();

        let result = self
            .settings
            .retry
            .run_observed(
                || {
                    let target = self.target.clone();
                    async move { target.execute_batch(chunk).await }
                },
                classify_db_error,
                |_, _| self.metrics.increment_retries(1),
            )
            .await;

        let table = chunk[0].table.clone();
        match result {
            Ok(affected) => {
                self.metrics.increment_statements(chunk.len() as u64);
                self.metrics.increment_bytes(bytes as u64);
                debug!(
                    table = %table,
                    kind = %chunk[0].kind,
                    statements = chunk.len(),
                    affected,
                    "Statements committed"
                );
                Ok(affected)
            }
            Err(RetryError::Fatal(source)) => Err(ImporterError::WriteBatch { table, source }),
            Err(RetryError::AttemptsExceeded { attempts, last }) => {
                Err(ImporterError::RetriesExhausted {
                    table,
                    statements: chunk.len(),
                    attempts,
                    source: last,
                })
            }
        }
    }
}

/// Splits statements into runs of equal shape, each at most `max` long.
fn chunk_by_shape(statements: &[Statement], max: usize) -> Vec<&[Statement]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for i in 1..=statements.len() {
        let boundary = i == statements.len()
            || i - start >= max
            || !statements[i].same_shape(&statements[start]);
        if boundary {
            chunks.push(&statements[start..i]);
            start = i;
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RecordSender, channel};
    use async_trait::async_trait;
    use connectors::{
        memory::MemoryDatabase,
        metadata::{provider::StaticMetadataProvider, table::TableMetadata},
        sql::base::builder::DialectSqlBuilder,
    };
    use engine_core::{
        error::StateStoreError,
        state::{StateStore, memory_store::MemoryStateStore},
    };
    use model::{
        check::JobCheckResult,
        position::Position,
        core::{
            identifiers::{JobId, ShardItem},
            value::Value,
        },
        job::progress::JobItemProgress,
        records::{column::Column, record::RecordType},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn is_after(position: &Position, committed: &Position) -> bool {
        matches!(
            position.partial_cmp(committed),
            Some(std::cmp::Ordering::Greater)
        )
    }

    fn target() -> Arc<MemoryDatabase> {
        let db = Arc::new(MemoryDatabase::new());
        db.create_table("t_order", &["id"]);
        db
    }

    fn metadata() -> Arc<dyn TableMetadataProvider> {
        Arc::new(
            StaticMetadataProvider::new()
                .with_table("t_order_0", TableMetadata::new("t_order", vec!["id".into()])),
        )
    }

    fn settings(batch_size: usize, retries: usize) -> ImporterSettings {
        ImporterSettings {
            batch_size,
            fetch_timeout: Duration::from_millis(20),
            retry: RetryPolicy::with_retries(retries, Duration::from_millis(1), Duration::from_millis(2)),
            rate_limiter: None,
        }
    }

    fn new_importer(db: &Arc<MemoryDatabase>, settings: ImporterSettings) -> (RecordSender, Importer) {
        let (tx, rx) = channel(100);
        let importer = Importer::new(
            rx,
            db.clone(),
            metadata(),
            Arc::new(DialectSqlBuilder::postgres()),
            settings,
            Metrics::new(),
        );
        (tx, importer)
    }

    async fn new_tracker(store: Arc<dyn StateStore>) -> ProgressTracker {
        ProgressTracker::load_or_create(&JobId::new("j1"), 0, store)
            .await
            .unwrap()
    }

    fn insert(id: i64, status: &str, lsn: u64) -> Record {
        DataRecord::new("t_order_0", RecordType::Insert, Position::Log { lsn })
            .with_column(Column::key("id", id))
            .with_column(Column::value("status", status))
            .into()
    }

    fn update(id: i64, status: &str, lsn: u64) -> Record {
        DataRecord::new("t_order_0", RecordType::Update, Position::Log { lsn })
            .with_column(Column::key("id", id).with_updated(false))
            .with_column(Column::value("status", status))
            .into()
    }

    fn delete(id: i64, lsn: u64) -> Record {
        DataRecord::new("t_order_0", RecordType::Delete, Position::Log { lsn })
            .with_column(Column::key("id", id))
            .into()
    }

    fn statuses(db: &MemoryDatabase) -> Vec<(Value, Value)> {
        db.rows("t_order")
            .into_iter()
            .map(|row| (row.get_value("id"), row.get_value("status")))
            .collect()
    }

    #[tokio::test]
    #[traced_test]
    async fn applies_window_and_persists_position() {
        let db = target();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut tracker = new_tracker(store.clone()).await;
        let (tx, mut importer) = new_importer(&db, settings(100, 0));

        let cancel = CancellationToken::new();
        tx.push_batch(
            vec![
                insert(1, "new", 1),
                insert(2, "new", 2),
                update(1, "paid", 3),
                delete(2, 4),
                insert(3, "new", 5),
                Record::finished(Position::Log { lsn: 5 }),
            ],
            &cancel,
        )
        .await
        .unwrap();

        let outcome = importer.run(&mut tracker, &cancel).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Finished);
        assert_eq!(
            statuses(&db),
            vec![
                (Value::Int(1), Value::from("paid")),
                (Value::Int(3), Value::from("new")),
            ]
        );

        let stored = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(stored.position, Position::Log { lsn: 5 });
        assert_eq!(stored.processed_record_count, 5);

        let metrics = importer.metrics().snapshot();
        assert_eq!(metrics.records_received, 5);
        assert_eq!(metrics.records_applied, 2);
        assert_eq!(metrics.records_merged_away(), 3);
        assert!(logs_contain("Batch processed successfully"));
    }

    #[tokio::test]
    async fn reapplying_a_window_is_idempotent() {
        let db = target();
        let window = vec![insert(1, "new", 1), update(1, "paid", 2), insert(2, "new", 3)];

        for _ in 0..2 {
            let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
            let mut tracker = new_tracker(store).await;
            let (_tx, mut importer) = new_importer(&db, settings(100, 0));
            importer
                .process_window(window.clone(), &mut tracker)
                .await
                .unwrap();
        }

        assert_eq!(
            statuses(&db),
            vec![
                (Value::Int(1), Value::from("paid")),
                (Value::Int(2), Value::from("new")),
            ]
        );
    }

    #[tokio::test]
    async fn mixed_shapes_flush_as_separate_batches() {
        let db = target();
        db.insert_row("t_order", vec![("id", Value::Int(9)), ("status", Value::from("old"))])
            .unwrap();
        let mut tracker = new_tracker(Arc::new(MemoryStateStore::new())).await;
        let (_tx, mut importer) = new_importer(&db, settings(2, 0));

        importer
            .process_window(
                vec![
                    insert(1, "a", 1),
                    insert(2, "b", 2),
                    insert(3, "c", 3),
                    delete(9, 4),
                ],
                &mut tracker,
            )
            .await
            .unwrap();

        // Three inserts split by batch size, then the delete on its own.
        assert_eq!(db.batches_committed(), 3);
        assert_eq!(importer.metrics().snapshot().statements_executed, 4);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let db = target();
        db.fail_next_batches(2);
        let mut tracker = new_tracker(Arc::new(MemoryStateStore::new())).await;
        let (_tx, mut importer) = new_importer(&db, settings(100, 3));

        importer
            .process_window(vec![insert(1, "new", 1)], &mut tracker)
            .await
            .unwrap();

        assert_eq!(statuses(&db).len(), 1);
        assert_eq!(importer.metrics().snapshot().retry_count, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_without_advancing_progress() {
        let db = target();
        db.fail_next_batches(5);
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut tracker = new_tracker(store.clone()).await;
        let (_tx, mut importer) = new_importer(&db, settings(100, 2));

        let err = importer
            .process_window(vec![insert(1, "new", 7)], &mut tracker)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImporterError::RetriesExhausted { attempts: 3, .. }
        ));
        let stored = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(stored.position, Position::Placeholder);
        assert_eq!(importer.metrics().snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn ordering_violation_is_fatal_and_writes_nothing() {
        let db = target();
        let mut tracker = new_tracker(Arc::new(MemoryStateStore::new())).await;
        let (_tx, mut importer) = new_importer(&db, settings(100, 3));

        let err = importer
            .process_window(vec![insert(1, "a", 1), insert(1, "b", 2)], &mut tracker)
            .await
            .unwrap_err();

        assert!(matches!(err, ImporterError::Merge(_)));
        assert!(err.to_string().contains("t_order_0"));
        assert_eq!(db.batches_committed(), 0);
    }

    #[tokio::test]
    async fn placeholder_advances_position_without_writing() {
        let db = target();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let mut tracker = new_tracker(store.clone()).await;
        let (_tx, mut importer) = new_importer(&db, settings(100, 0));

        importer
            .process_window(vec![Record::placeholder(Position::Log { lsn: 42 })], &mut tracker)
            .await
            .unwrap();

        assert_eq!(db.batches_committed(), 0);
        let stored = store.load_progress("j1", 0).await.unwrap().unwrap();
        assert_eq!(stored.position, Position::Log { lsn: 42 });
    }

    #[tokio::test]
    async fn stops_on_cancel_and_exits_when_drained() {
        let db = target();
        let mut tracker = new_tracker(Arc::new(MemoryStateStore::new())).await;

        let (_tx, mut importer) = new_importer(&db, settings(100, 0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            importer.run(&mut tracker, &cancel).await.unwrap(),
            ImportOutcome::Stopped
        );

        let (tx, mut importer) = new_importer(&db, settings(100, 0));
        let cancel = CancellationToken::new();
        tx.push(insert(1, "new", 1), &cancel).await.unwrap();
        drop(tx);
        assert_eq!(
            importer.run(&mut tracker, &cancel).await.unwrap(),
            ImportOutcome::Drained
        );
        assert_eq!(statuses(&db).len(), 1);
    }

    /// Fails the n-th progress save, simulating a crash right after the
    /// target commit.
    struct CrashingStore {
        inner: MemoryStateStore,
        saves: AtomicUsize,
        crash_on: usize,
    }

    #[async_trait]
    impl StateStore for CrashingStore {
        async fn save_progress(&self, progress: &JobItemProgress) -> Result<(), StateStoreError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.crash_on {
                return Err(StateStoreError::SaveProgress {
                    job_id: progress.job_id.to_string(),
                    shard_item: progress.shard_item,
                    message: "simulated crash".into(),
                });
            }
            self.inner.save_progress(progress).await
        }
        async fn load_progress(
            &self,
            job_id: &str,
            shard_item: ShardItem,
        ) -> Result<Option<JobItemProgress>, StateStoreError> {
            self.inner.load_progress(job_id, shard_item).await
        }
        async fn list_progress(&self, job_id: &str) -> Result<Vec<JobItemProgress>, StateStoreError> {
            self.inner.list_progress(job_id).await
        }
        async fn list_jobs(&self) -> Result<Vec<String>, StateStoreError> {
            self.inner.list_jobs().await
        }
        async fn delete_job(&self, job_id: &str) -> Result<(), StateStoreError> {
            self.inner.delete_job(job_id).await
        }
        async fn save_check_result(
            &self,
            job_id: &str,
            result: &JobCheckResult,
        ) -> Result<(), StateStoreError> {
            self.inner.save_check_result(job_id, result).await
        }
        async fn load_check_result(
            &self,
            job_id: &str,
        ) -> Result<Option<JobCheckResult>, StateStoreError> {
            self.inner.load_check_result(job_id).await
        }
        async fn delete_check_result(&self, job_id: &str) -> Result<(), StateStoreError> {
            self.inner.delete_check_result(job_id).await
        }
    }

    #[tokio::test]
    async fn crash_before_progress_save_replays_last_window_only() {
        let windows = vec![
            vec![insert(1, "new", 1), insert(2, "new", 2)],
            vec![update(1, "paid", 3), delete(2, 4), insert(3, "new", 5)],
        ];

        // Uninterrupted run.
        let expected_db = target();
        let mut t = new_tracker(Arc::new(MemoryStateStore::new())).await;
        let (_tx, mut imp) = new_importer(&expected_db, settings(100, 0));
        for window in &windows {
            imp.process_window(window.clone(), &mut t).await.unwrap();
        }

        // Save #1 creates the progress, #2 commits window one, #3 crashes.
        let db = target();
        let store = Arc::new(CrashingStore {
            inner: MemoryStateStore::new(),
            saves: AtomicUsize::new(0),
            crash_on: 3,
        });
        let mut t = new_tracker(store.clone()).await;
        let (_tx, mut imp) = new_importer(&db, settings(100, 0));
        imp.process_window(windows[0].clone(), &mut t).await.unwrap();
        let err = imp
            .process_window(windows[1].clone(), &mut t)
            .await
            .unwrap_err();
        assert!(matches!(err, ImporterError::Progress(_)));

        // Restart: replay everything after the persisted position.
        let mut t = new_tracker(store.clone()).await;
        assert_eq!(t.position(), &Position::Log { lsn: 2 });
        let replay: Vec<Record> = windows
            .concat()
            .into_iter()
            .filter(|r| is_after(r.position(), t.position()))
            .collect();
        assert_eq!(replay.len(), 3);
        let (_tx, mut imp) = new_importer(&db, settings(100, 0));
        imp.process_window(replay, &mut t).await.unwrap();

        assert_eq!(statuses(&db), statuses(&expected_db));
    }
}
