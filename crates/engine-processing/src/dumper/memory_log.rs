use crate::{
    channel::RecordSender,
    dumper::{Dumper, IncrementalDumper},
    error::{ChannelError, DumperError},
};
use async_trait::async_trait;
use connectors::memory::MemoryDatabase;
use model::{position::Position, records::record::Record};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Incremental capture over the change log of a [`MemoryDatabase`].
pub struct MemoryLogDumper {
    source: Arc<MemoryDatabase>,
    tables: BTreeSet<String>,
    after_lsn: u64,
    batch_size: usize,
    poll_interval: Duration,
    finish_when_caught_up: bool,
}

impl MemoryLogDumper {
    pub fn new(source: Arc<MemoryDatabase>, tables: impl IntoIterator<Item = String>, batch_size: usize) -> Self {
        Self {
            source,
            tables: tables.into_iter().collect(),
            after_lsn: 0,
            batch_size: batch_size.max(1),
            poll_interval: Duration::from_millis(50),
            finish_when_caught_up: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Emits a `Finished` record once the log is exhausted instead of polling.
    pub fn finish_when_caught_up(mut self, finish: bool) -> Self {
        self.finish_when_caught_up = finish;
        self
    }

    async fn push(&self, sender: &RecordSender, records: Vec<Record>, cancel: &CancellationToken) -> Result<bool, DumperError> {
        match sender.push_batch(records, cancel).await {
            Ok(()) => Ok(true),
            Err(ChannelError::Cancelled) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Dumper for MemoryLogDumper {
    async fn run(&mut self, sender: RecordSender, cancel: CancellationToken) -> Result<(), DumperError> {
        info!(after_lsn = self.after_lsn, tables = self.tables.len(), "Incremental capture started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let changes = self.source.changes_after(self.after_lsn, self.batch_size);
            let Some(last) = changes.last() else {
                if self.finish_when_caught_up {
                    let finished = Record::finished(Position::Log { lsn: self.after_lsn });
                    self.push(&sender, vec![finished], &cancel).await?;
                    info!(lsn = self.after_lsn, "Incremental capture caught up");
                    return Ok(());
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            };

            let Position::Log { lsn } = last.position else {
                return Err(DumperError::InvalidPosition(last.position.to_string()));
            };

            let fetched = changes.len();
            let records: Vec<Record> = changes
                .into_iter()
                .filter(|change| self.tables.contains(&change.table_name))
                .map(Record::from)
                .collect();

            // Changes of other shard items still move the position forward.
            let batch = if records.is_empty() {
                vec![Record::placeholder(Position::Log { lsn })]
            } else {
                records
            };

            debug!(fetched, pushed = batch.len(), lsn, "Change batch captured");
            if !self.push(&sender, batch, &cancel).await? {
                break;
            }
            self.after_lsn = lsn;
        }

        info!(lsn = self.after_lsn, "Incremental capture stopped");
        Ok(())
    }
}

#[async_trait]
impl IncrementalDumper for MemoryLogDumper {
    async fn current_position(&self) -> Result<Position, DumperError> {
        Ok(Position::Log {
            lsn: self.source.current_lsn(),
        })
    }

    fn seek(&mut self, position: &Position) -> Result<(), DumperError> {
        self.after_lsn = match position {
            Position::Log { lsn } => *lsn,
            Position::Placeholder => 0,
            other => return Err(DumperError::InvalidPosition(other.to_string())),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use model::{
        core::value::Value,
        records::{
            column::Column,
            record::{DataRecord, RecordType},
        },
    };

    fn source() -> Arc<MemoryDatabase> {
        let db = Arc::new(MemoryDatabase::new());
        db.create_table("t_order_0", &["id"]);
        db.create_table("t_order_1", &["id"]);
        db
    }

    fn insert(db: &MemoryDatabase, table: &str, id: i64) {
        db.apply_change(
            DataRecord::new(table, RecordType::Insert, Position::Placeholder)
                .with_column(Column::key("id", id)),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn captures_changes_after_seek_position() {
        let db = source();
        insert(&db, "t_order_0", 1);
        let mut dumper = MemoryLogDumper::new(db.clone(), ["t_order_0".to_string()], 10)
            .finish_when_caught_up(true);
        let start = dumper.current_position().await.unwrap();
        insert(&db, "t_order_0", 2);
        insert(&db, "t_order_0", 3);

        dumper.seek(&start).unwrap();
        let (tx, mut rx) = channel(100);
        dumper.run(tx, CancellationToken::new()).await.unwrap();

        let records = rx.fetch_records(100, Duration::from_millis(20)).await;
        let ids: Vec<Value> = records
            .iter()
            .filter_map(Record::as_data)
            .map(|r| r.key().values[0].clone())
            .collect();
        assert_eq!(ids, vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(
            records.last(),
            Some(&Record::finished(Position::Log { lsn: db.current_lsn() }))
        );
    }

    #[tokio::test]
    async fn foreign_tables_only_advance_position() {
        let db = source();
        insert(&db, "t_order_1", 1);
        let mut dumper = MemoryLogDumper::new(db.clone(), ["t_order_0".to_string()], 10)
            .finish_when_caught_up(true);
        let (tx, mut rx) = channel(100);
        dumper.run(tx, CancellationToken::new()).await.unwrap();

        let records = rx.fetch_records(100, Duration::from_millis(20)).await;
        assert!(matches!(records[0], Record::Placeholder(_)));
        assert_eq!(records[0].position(), &Position::Log { lsn: db.current_lsn() });
    }

    #[tokio::test]
    async fn polls_until_cancelled() {
        let db = source();
        let mut dumper = MemoryLogDumper::new(db.clone(), ["t_order_0".to_string()], 10)
            .with_poll_interval(Duration::from_millis(5));
        let (tx, mut rx) = channel(100);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { dumper.run(tx, cancel).await }
        });

        insert(&db, "t_order_0", 7);
        let records = rx.fetch_records(10, Duration::from_secs(2)).await;
        assert_eq!(records.len(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn seek_rejects_inventory_positions() {
        let mut dumper = MemoryLogDumper::new(source(), Vec::new(), 10);
        let err = dumper
            .seek(&Position::PrimaryKey {
                table: "t".into(),
                after: vec![Value::Int(1)],
            })
            .unwrap_err();
        assert!(matches!(err, DumperError::InvalidPosition(_)));
    }
}
