use crate::{
    channel::RecordSender,
    dumper::Dumper,
    error::{ChannelError, DumperError},
    retry::classify_db_error,
};
use async_trait::async_trait;
use connectors::sql::base::source::RowReader;
use engine_core::retry::{RetryError, RetryPolicy};
use model::{
    core::value::Value,
    position::Position,
    records::{
        record::{DataRecord, Record},
        row::RowData,
    },
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A source table scanned by the inventory dumper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryTable {
    pub name: String,
    pub key_columns: Vec<String>,
}

impl InventoryTable {
    pub fn new(name: impl Into<String>, key_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            key_columns,
        }
    }
}

/// Snapshot scan of a shard item's tables in primary-key order.
///
/// Tables are scanned one after another in the order given. Every record
/// carries a `PrimaryKey` position, so a persisted position tells exactly
/// which table and key to resume after.
pub struct InventoryDumper {
    reader: Arc<dyn RowReader>,
    tables: Vec<InventoryTable>,
    batch_size: usize,
    retry: RetryPolicy,
    start: Position,
}

impl InventoryDumper {
    pub fn new(
        reader: Arc<dyn RowReader>,
        tables: Vec<InventoryTable>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader,
            tables,
            batch_size: batch_size.max(1),
            retry,
            start: Position::Placeholder,
        }
    }

    /// Resumes the scan after a persisted position.
    pub fn resume_from(mut self, position: Position) -> Self {
        self.start = position;
        self
    }

    /// Index of the first table to scan and the key to start after.
    fn starting_point(&self) -> Result<(usize, Option<Vec<Value>>), DumperError> {
        match &self.start {
            Position::Placeholder => Ok((0, None)),
            Position::Finished => Ok((self.tables.len(), None)),
            Position::PrimaryKey { table, after } => self
                .tables
                .iter()
                .position(|t| &t.name == table)
                .map(|idx| (idx, Some(after.clone())))
                .ok_or_else(|| DumperError::InvalidPosition(self.start.to_string())),
            Position::Log { .. } => Err(DumperError::InvalidPosition(self.start.to_string())),
        }
    }

    async fn fetch_page(
        &self,
        table: &InventoryTable,
        after: Option<&[Value]>,
    ) -> Result<Vec<RowData>, DumperError> {
        let result = self
            .retry
            .run(
                || {
                    let reader = self.reader.clone();
                    async move {
                        reader
                            .fetch_page(&table.name, &table.key_columns, after, self.batch_size)
                            .await
                    }
                },
                classify_db_error,
            )
            .await;

        result.map_err(|e| {
            let source = match e {
                RetryError::Fatal(source) => source,
                RetryError::AttemptsExceeded { last, .. } => last,
            };
            DumperError::Read {
                table: table.name.clone(),
                source,
            }
        })
    }
}

#[async_trait]
impl Dumper for InventoryDumper {
    async fn run(&mut self, sender: RecordSender, cancel: CancellationToken) -> Result<(), DumperError> {
        let (first, mut after) = self.starting_point()?;

        for table in &self.tables[first..] {
            let mut dumped = 0u64;
            info!(table = %table.name, resume_after = ?after, "Inventory scan started");

            loop {
                if cancel.is_cancelled() {
                    info!(table = %table.name, dumped, "Inventory scan stopped");
                    return Ok(());
                }

                let rows = self.fetch_page(table, after.as_deref()).await?;
                if rows.is_empty() {
                    break;
                }
                let page_len = rows.len();

                let records: Vec<Record> = rows
                    .into_iter()
                    .map(|row| {
                        let key = row.key_values(&table.key_columns);
                        let position = Position::PrimaryKey {
                            table: table.name.clone(),
                            after: key,
                        };
                        DataRecord::from_row(row, &table.key_columns, position).into()
                    })
                    .collect();

                after = records.last().and_then(|r| match r.position() {
                    Position::PrimaryKey { after, .. } => Some(after.clone()),
                    _ => None,
                });

                match sender.push_batch(records, &cancel).await {
                    Ok(()) => {}
                    Err(ChannelError::Cancelled) => {
                        info!(table = %table.name, dumped, "Inventory scan stopped");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
                dumped += page_len as u64;
                debug!(table = %table.name, rows = page_len, "Inventory page pushed");

                if page_len < self.batch_size {
                    break;
                }
            }

            info!(table = %table.name, rows = dumped, "Inventory table dumped");
            after = None;
        }

        match sender.push(Record::finished(Position::Finished), &cancel).await {
            Ok(()) | Err(ChannelError::Cancelled) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
