//! Runs one shard item through its phases.
//!
//! ```text
//! Preparing              capture the incremental start position
//! ExecuteInventoryTask   snapshot scan, resumable by primary key
//! ExecuteIncrementalTask change capture from the start position
//! ```
//!
//! Each phase connects a dumper task and the importer through a fresh channel.

use crate::{error::PipelineError, source::ItemSource};
use connectors::{
    metadata::provider::TableMetadataProvider,
    sql::base::{builder::SqlBuilder, destination::TargetDataSource},
};
use engine_core::{metrics::Metrics, retry::RetryPolicy, state::StateStore};
use engine_processing::{
    channel::channel,
    dumper::{
        Dumper,
        inventory::{InventoryDumper, InventoryTable},
    },
    error::{ChannelError, DumperError},
    importer::{ImportOutcome, Importer, ImporterSettings},
    progress::ProgressTracker,
};
use model::{
    core::identifiers::{JobId, ShardItem},
    job::status::JobStatus,
    position::Position,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// Everything the pipelines of one job share.
pub struct PipelineContext {
    pub job_id: JobId,
    pub store: Arc<dyn StateStore>,
    pub target: Arc<dyn TargetDataSource>,
    pub metadata: Arc<dyn TableMetadataProvider>,
    pub builder: Arc<dyn SqlBuilder>,
    pub importer: ImporterSettings,
    pub read_batch_size: usize,
    pub read_retry: RetryPolicy,
    pub channel_capacity: usize,
    pub metrics: Metrics,
}

pub struct ShardItemPipeline {
    ctx: Arc<PipelineContext>,
    shard_item: ShardItem,
    tables: Vec<String>,
    source: Arc<dyn ItemSource>,
}

impl ShardItemPipeline {
    pub fn new(
        ctx: Arc<PipelineContext>,
        shard_item: ShardItem,
        tables: Vec<String>,
        source: Arc<dyn ItemSource>,
    ) -> Self {
        Self {
            ctx,
            shard_item,
            tables,
            source,
        }
    }

    /// Drives the item until it completes, is cancelled or fails. A failure
    /// stops the item with its error message and is not returned; only a
    /// failure to persist state is.
    pub async fn run(self, cancel: CancellationToken) -> Result<JobStatus, PipelineError> {
        let mut tracker = ProgressTracker::load_or_create(
            &self.ctx.job_id,
            self.shard_item,
            self.ctx.store.clone(),
        )
        .await?;

        match self.drive(&mut tracker, &cancel).await {
            Ok(status) if cancel.is_cancelled() && status.is_running() => {
                tracker.stop(None).await?;
                Ok(tracker.status())
            }
            Ok(status) => Ok(status),
            Err(e) => {
                error!(error = %e, "Shard item failed");
                tracker.stop(Some(e.to_string())).await?;
                Ok(tracker.status())
            }
        }
    }

    async fn drive(
        &self,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<JobStatus, PipelineError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(tracker.status());
            }

            match tracker.status() {
                JobStatus::Preparing => {
                    let dumper = self
                        .source
                        .incremental_dumper(&self.tables, self.ctx.read_batch_size)?;
                    let start = dumper.current_position().await?;
                    info!(incremental_start = %start, "Incremental start position captured");
                    tracker.set_incremental_start(start).await?;
                    tracker
                        .begin_phase(JobStatus::ExecuteInventoryTask, Position::Placeholder)
                        .await?;
                }
                JobStatus::ExecuteInventoryTask => {
                    let dumper = InventoryDumper::new(
                        self.source.reader(),
                        self.inventory_tables()?,
                        self.ctx.read_batch_size,
                        self.ctx.read_retry.clone(),
                    )
                    .resume_from(tracker.position().clone());

                    match self.run_phase(Box::new(dumper), tracker, cancel).await? {
                        ImportOutcome::Finished => {
                            let start = tracker
                                .progress()
                                .incremental_start
                                .clone()
                                .unwrap_or_default();
                            tracker
                                .begin_phase(JobStatus::ExecuteIncrementalTask, start)
                                .await?;
                        }
                        _ => return Ok(tracker.status()),
                    }
                }
                JobStatus::ExecuteIncrementalTask => {
                    let mut dumper = self
                        .source
                        .incremental_dumper(&self.tables, self.ctx.read_batch_size)?;
                    dumper.seek(tracker.position())?;

                    match self.run_phase(dumper, tracker, cancel).await? {
                        ImportOutcome::Finished => {
                            tracker
                                .transition(JobStatus::ExecuteIncrementalTaskCompleted)
                                .await?;
                        }
                        _ => return Ok(tracker.status()),
                    }
                }
                status => return Ok(status),
            }
        }
    }

    fn inventory_tables(&self) -> Result<Vec<InventoryTable>, PipelineError> {
        self.tables
            .iter()
            .map(|table| {
                self.ctx
                    .metadata
                    .metadata_for_source(table)
                    .map(|meta| InventoryTable::new(table.clone(), meta.primary_keys.clone()))
                    .ok_or_else(|| PipelineError::MissingMetadata(table.clone()))
            })
            .collect()
    }

    async fn run_phase<D>(
        &self,
        mut dumper: Box<D>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, PipelineError>
    where
        D: Dumper + ?Sized + 'static,
    {
        let phase = cancel.child_token();
        let (sender, receiver) = channel(self.ctx.channel_capacity);

        let dumper_handle = tokio::spawn({
            let phase = phase.clone();
            async move { dumper.run(sender, phase).await }.in_current_span()
        });

        let mut importer = Importer::new(
            receiver,
            self.ctx.target.clone(),
            self.ctx.metadata.clone(),
            self.ctx.builder.clone(),
            self.ctx.importer.clone(),
            self.ctx.metrics.clone(),
        );
        let imported = importer.run(tracker, &phase).await;

        // Releases a dumper blocked on a full channel.
        phase.cancel();
        drop(importer);
        let dumped = dumper_handle.await?;

        let outcome = imported?;
        match dumped {
            Err(DumperError::Channel(ChannelError::Closed)) | Ok(()) => {}
            Err(e) if outcome != ImportOutcome::Finished => return Err(e.into()),
            Err(e) => warn!(error = %e, "Dumper failed after the phase finished"),
        }
        if outcome == ImportOutcome::Drained && !cancel.is_cancelled() {
            return Err(PipelineError::UnexpectedEnd);
        }
        Ok(outcome)
    }
}

/// Stable display name of a shard item.
pub fn item_name(job_id: &JobId, shard_item: ShardItem, tables: &[String]) -> String {
    let mut h = blake3::Hasher::new();
    h.update(job_id.as_str().as_bytes());
    h.update(b":");
    h.update(shard_item.to_string().as_bytes());
    for table in tables {
        h.update(b":");
        h.update(table.as_bytes());
    }
    format!("itm-{}", &h.finalize().to_hex()[..16])
}
