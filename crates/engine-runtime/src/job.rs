//! Job lifecycle across shard items.

use crate::{
    error::{JobError, PipelineError},
    pipeline::{PipelineContext, ShardItemPipeline, item_name},
    source::ItemSource,
};
use chrono::{DateTime, Utc};
use connectors::{
    metadata::provider::TableMetadataProvider,
    sql::base::{
        builder::DialectSqlBuilder,
        destination::TargetDataSource,
        source::RowReader,
    },
};
use engine_config::settings::MigrationJobConfig;
use engine_core::{
    metrics::{Metrics, MetricsSnapshot},
    retry::RetryPolicy,
    state::StateStore,
};
use engine_processing::{
    check::{ConsistencyChecker, SourceTable, algorithm::{CheckAlgorithmRegistry, ContentCheckAlgorithm}},
    importer::ImporterSettings,
    progress::ProgressTracker,
};
use model::{
    check::JobCheckResult,
    core::identifiers::{JobId, ShardItem},
    job::{progress::JobItemProgress, status::JobStatus},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

type ItemHandle = JoinHandle<Result<JobStatus, PipelineError>>;

struct Running {
    cancel: CancellationToken,
    handles: Vec<(ShardItem, ItemHandle)>,
}

impl Running {
    fn is_active(&self) -> bool {
        self.handles.iter().any(|(_, h)| !h.is_finished())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub shard_item: ShardItem,
    pub name: String,
    pub status: JobStatus,
    pub position: String,
    pub processed_record_count: u64,
    pub last_update_time: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Persisted state of a job as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub items: Vec<ItemReport>,
    pub check: Option<JobCheckResult>,
}

impl JobStatusReport {
    /// Reads the report straight from the state store.
    pub async fn load(store: &dyn StateStore, job_id: &JobId) -> Result<Self, JobError> {
        let items = store
            .list_progress(job_id.as_str())
            .await?
            .into_iter()
            .map(|progress| ItemReport::from_progress(job_id, progress, &[]))
            .collect();
        let check = store.load_check_result(job_id.as_str()).await?;
        Ok(Self {
            job_id: job_id.to_string(),
            items,
            check,
        })
    }
}

impl ItemReport {
    fn from_progress(job_id: &JobId, progress: JobItemProgress, tables: &[String]) -> Self {
        Self {
            shard_item: progress.shard_item,
            name: item_name(job_id, progress.shard_item, tables),
            status: progress.status,
            position: progress.position.to_string(),
            processed_record_count: progress.processed_record_count,
            last_update_time: progress.last_update_time,
            error_message: progress.error_message,
        }
    }
}

pub struct MigrationJobBuilder {
    config: MigrationJobConfig,
    store: Option<Arc<dyn StateStore>>,
    target: Option<(Arc<dyn TargetDataSource>, Arc<dyn RowReader>)>,
    sources: BTreeMap<ShardItem, Arc<dyn ItemSource>>,
}

impl MigrationJobBuilder {
    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn target(mut self, target: Arc<dyn TargetDataSource>, reader: Arc<dyn RowReader>) -> Self {
        self.target = Some((target, reader));
        self
    }

    pub fn item_source(mut self, shard_item: ShardItem, source: Arc<dyn ItemSource>) -> Self {
        self.sources.insert(shard_item, source);
        self
    }

    /// Validates the configuration and resolves every algorithm once.
    pub fn build(self) -> Result<MigrationJob, JobError> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| JobError::Config(missing("state store")))?;
        let (target, target_reader) = self
            .target
            .ok_or_else(|| JobError::Config(missing("target")))?;
        for idx in 0..config.shard_items.len() as ShardItem {
            if !self.sources.contains_key(&idx) {
                return Err(JobError::MissingSource(idx));
            }
        }

        let check_algorithm = CheckAlgorithmRegistry::create(
            &config.consistency_check.name,
            &config.consistency_check.props,
        )?;
        let importer = ImporterSettings::from_config(&config.pipeline)?;
        let metadata: Arc<dyn TableMetadataProvider> = Arc::new(config.metadata_provider());
        let job_id = config.job_id();

        let ctx = PipelineContext {
            job_id: job_id.clone(),
            store,
            target,
            metadata,
            builder: Arc::new(DialectSqlBuilder::postgres()),
            importer,
            read_batch_size: config.pipeline.read.batch_size,
            read_retry: RetryPolicy::for_database(),
            channel_capacity: config.pipeline.channel.capacity,
            metrics: Metrics::new(),
        };

        info!(
            job_id = %job_id,
            shard_items = config.shard_items.len(),
            tables = config.tables.len(),
            check_algorithm = check_algorithm.name(),
            "Migration job created"
        );

        Ok(MigrationJob {
            ctx: Arc::new(ctx),
            config,
            target_reader,
            sources: self.sources,
            check_algorithm,
            running: Mutex::new(None),
        })
    }
}

fn missing(what: &str) -> engine_config::error::ConfigError {
    engine_config::error::ConfigError::ValidationFailed(vec![format!("{what} is not set")])
}

/// A migration job: one pipeline per shard item plus the job-wide
/// check, commit and rollback operations.
pub struct MigrationJob {
    ctx: Arc<PipelineContext>,
    config: MigrationJobConfig,
    target_reader: Arc<dyn RowReader>,
    sources: BTreeMap<ShardItem, Arc<dyn ItemSource>>,
    check_algorithm: Arc<dyn ContentCheckAlgorithm>,
    running: Mutex<Option<Running>>,
}

impl MigrationJob {
    pub fn builder(config: MigrationJobConfig) -> MigrationJobBuilder {
        MigrationJobBuilder {
            config,
            store: None,
            target: None,
            sources: BTreeMap::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.ctx.job_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(Running::is_active)
    }

    fn tables_of(&self, shard_item: ShardItem) -> &[String] {
        self.config
            .shard_items
            .get(shard_item as usize)
            .map(|item| item.tables.as_slice())
            .unwrap_or_default()
    }

    /// Spawns one pipeline per shard item and returns immediately.
    pub async fn start(&self) -> Result<(), JobError> {
        if self.is_running() {
            return Err(JobError::AlreadyRunning(self.job_id().to_string()));
        }
        let persisted = self.ctx.store.list_progress(self.job_id().as_str()).await?;
        if persisted.iter().any(|p| p.status == JobStatus::Finished) {
            return Err(JobError::AlreadyFinished(self.job_id().to_string()));
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.sources.len());
        for (shard_item, source) in &self.sources {
            let tables = self.tables_of(*shard_item).to_vec();
            let span = info_span!(
                "shard_item",
                job_id = %self.job_id(),
                shard_item = *shard_item,
                item = %item_name(self.job_id(), *shard_item, &tables),
            );
            let pipeline =
                ShardItemPipeline::new(self.ctx.clone(), *shard_item, tables, source.clone());
            let handle = tokio::spawn(pipeline.run(cancel.clone()).instrument(span));
            handles.push((*shard_item, handle));
        }

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(Running::is_active) {
            cancel.cancel();
            return Err(JobError::AlreadyRunning(self.job_id().to_string()));
        }
        *running = Some(Running { cancel, handles });
        info!(job_id = %self.job_id(), shard_items = self.sources.len(), "Migration job started");
        Ok(())
    }

    /// Waits for every pipeline to return and reports the final statuses.
    pub async fn wait(&self) -> Result<BTreeMap<ShardItem, JobStatus>, JobError> {
        let Some(running) = self.running.lock().take() else {
            return Ok(BTreeMap::new());
        };
        Self::join(running.handles).await
    }

    async fn join(
        handles: Vec<(ShardItem, ItemHandle)>,
    ) -> Result<BTreeMap<ShardItem, JobStatus>, JobError> {
        let (items, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut statuses = BTreeMap::new();
        for (shard_item, result) in items.into_iter().zip(results) {
            let status = result?.map_err(|source| JobError::Pipeline { shard_item, source })?;
            statuses.insert(shard_item, status);
        }
        Ok(statuses)
    }

    /// Cancels the pipelines and marks every unfinished item `Stopped`.
    pub async fn stop(&self) -> Result<(), JobError> {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = Self::join(running.handles).await {
                warn!(job_id = %self.job_id(), error = %e, "Pipeline failed while stopping");
            }
        }

        for progress in self.ctx.store.list_progress(self.job_id().as_str()).await? {
            if progress.status.is_running() {
                let mut tracker = self.tracker(progress.shard_item).await?;
                tracker.stop(None).await?;
            }
        }
        info!(job_id = %self.job_id(), "Migration job stopped");
        Ok(())
    }

    /// Moves stopped items back to the state they were stopped from and
    /// restarts the pipelines from their persisted positions.
    pub async fn resume(&self) -> Result<(), JobError> {
        if self.is_running() {
            return Err(JobError::AlreadyRunning(self.job_id().to_string()));
        }
        for progress in self.ctx.store.list_progress(self.job_id().as_str()).await? {
            if progress.status == JobStatus::Stopped {
                let mut tracker = self.tracker(progress.shard_item).await?;
                tracker.resume().await?;
            }
        }
        self.start().await
    }

    pub async fn status(&self) -> Result<JobStatusReport, JobError> {
        let mut report = JobStatusReport::load(self.ctx.store.as_ref(), self.job_id()).await?;
        for item in &mut report.items {
            item.name = item_name(self.job_id(), item.shard_item, self.tables_of(item.shard_item));
        }
        Ok(report)
    }

    /// Compares every target table with the source tables migrated into it
    /// and persists the aggregated result.
    pub async fn check(&self, cancel: &CancellationToken) -> Result<JobCheckResult, JobError> {
        let checker = ConsistencyChecker::new(
            self.target_reader.clone(),
            self.ctx.metadata.clone(),
            self.check_algorithm.clone(),
        )
        .with_rate_limiter(self.ctx.importer.rate_limiter.clone());

        let mut tables: Vec<SourceTable> = Vec::new();
        for (shard_item, source) in &self.sources {
            let reader = source.check_reader().await?;
            tables.extend(
                self.tables_of(*shard_item)
                    .iter()
                    .map(|table| SourceTable::new(reader.clone(), table.clone())),
            );
        }

        let result = checker.check_job(&tables, cancel).await?;
        self.ctx
            .store
            .save_check_result(self.job_id().as_str(), &result)
            .await?;
        info!(
            job_id = %self.job_id(),
            matched = result.matched,
            algorithm = %result.algorithm,
            "Consistency check result saved"
        );
        Ok(result)
    }

    /// Finishes the job once every item completed and the persisted check
    /// matched.
    pub async fn commit(&self) -> Result<(), JobError> {
        let job_id = self.job_id().as_str();
        let report = self.status().await?;

        let pending: Vec<ShardItem> = report
            .items
            .iter()
            .filter(|i| i.status != JobStatus::ExecuteIncrementalTaskCompleted)
            .map(|i| i.shard_item)
            .collect();
        if !pending.is_empty() || report.items.len() < self.sources.len() {
            return Err(JobError::NotCompleted {
                job_id: job_id.to_string(),
                items: pending,
            });
        }
        match &report.check {
            None => return Err(JobError::CheckMissing(job_id.to_string())),
            Some(check) if !check.matched => {
                return Err(JobError::CheckNotMatched(job_id.to_string()));
            }
            Some(_) => {}
        }

        self.ctx.target.cleanup(job_id).await?;
        self.ctx.store.delete_check_result(job_id).await?;
        for item in &report.items {
            let mut tracker = self.tracker(item.shard_item).await?;
            tracker.transition(JobStatus::Finished).await?;
        }
        info!(job_id, "Migration job committed");
        Ok(())
    }

    /// Discards target-side temporary objects and every persisted record of
    /// the job.
    pub async fn rollback(&self) -> Result<(), JobError> {
        let job_id = self.job_id().as_str();
        let persisted = self.ctx.store.list_progress(job_id).await?;
        if persisted.iter().any(|p| p.status == JobStatus::Finished) {
            return Err(JobError::AlreadyFinished(job_id.to_string()));
        }

        let running = self.running.lock().take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = Self::join(running.handles).await {
                error!(job_id, error = %e, "Pipeline failed during rollback");
            }
        }

        self.ctx.target.cleanup(job_id).await?;
        self.ctx.store.delete_job(job_id).await?;
        info!(job_id, "Migration job rolled back");
        Ok(())
    }

    async fn tracker(&self, shard_item: ShardItem) -> Result<ProgressTracker, JobError> {
        Ok(ProgressTracker::load_or_create(self.job_id(), shard_item, self.ctx.store.clone()).await?)
    }
}
