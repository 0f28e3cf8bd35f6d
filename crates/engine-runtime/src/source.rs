use crate::error::PipelineError;
use async_trait::async_trait;
use connectors::{adapter::Adapter, error::ConnectorError, sql::base::source::RowReader};
use engine_processing::dumper::{IncrementalDumper, memory_log::MemoryLogDumper};
use std::{sync::Arc, time::Duration};

/// Source side of a shard item: snapshot reads plus change capture.
#[async_trait]
pub trait ItemSource: Send + Sync {
    fn reader(&self) -> Arc<dyn RowReader>;

    /// A reader on its own connection, so verification never queues behind
    /// the dumper's queries.
    async fn check_reader(&self) -> Result<Arc<dyn RowReader>, ConnectorError>;

    /// A fresh incremental dumper over `tables`.
    fn incremental_dumper(
        &self,
        tables: &[String],
        batch_size: usize,
    ) -> Result<Box<dyn IncrementalDumper>, PipelineError>;
}

/// Item source backed by a connected [`Adapter`].
#[derive(Clone)]
pub struct AdapterSource {
    adapter: Adapter,
    poll_interval: Duration,
    finish_when_caught_up: bool,
}

impl AdapterSource {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            poll_interval: Duration::from_millis(50),
            finish_when_caught_up: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Lets incremental capture complete once it reaches the head of the log.
    pub fn finish_when_caught_up(mut self, finish: bool) -> Self {
        self.finish_when_caught_up = finish;
        self
    }
}

#[async_trait]
impl ItemSource for AdapterSource {
    fn reader(&self) -> Arc<dyn RowReader> {
        self.adapter.reader()
    }

    async fn check_reader(&self) -> Result<Arc<dyn RowReader>, ConnectorError> {
        Ok(self.adapter.reconnect().await?.reader())
    }

    fn incremental_dumper(
        &self,
        tables: &[String],
        batch_size: usize,
    ) -> Result<Box<dyn IncrementalDumper>, PipelineError> {
        match &self.adapter {
            Adapter::Memory(db) => Ok(Box::new(
                MemoryLogDumper::new(db.clone(), tables.iter().cloned(), batch_size)
                    .with_poll_interval(self.poll_interval)
                    .finish_when_caught_up(self.finish_when_caught_up),
            )),
            Adapter::Postgres(_) => Err(PipelineError::IncrementalUnsupported("postgres".into())),
        }
    }
}
