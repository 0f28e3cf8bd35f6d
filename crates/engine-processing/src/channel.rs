//! Bounded record queue between a dumper and its importer.
//!
//! Capacity is counted in records. A full channel blocks the producer, which
//! is the only back-pressure between capture and apply.

use crate::error::ChannelError;
use model::records::record::Record;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

pub fn channel(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordSender { tx },
        RecordReceiver { rx, drained: false },
    )
}

/// Producer half. Cloneable; the channel closes once every sender is gone.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
}

impl RecordSender {
    /// Pushes every record in order, waiting for space as needed.
    ///
    /// Returns `Cancelled` when `cancel` fires before all records are queued;
    /// records already queued stay in the channel.
    pub async fn push_batch(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        for record in records {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
                sent = self.tx.send(record) => sent.map_err(|_| ChannelError::Closed)?,
            }
        }
        Ok(())
    }

    pub async fn push(&self, record: Record, cancel: &CancellationToken) -> Result<(), ChannelError> {
        self.push_batch(vec![record], cancel).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<Record>,
    drained: bool,
}

impl RecordReceiver {
    /// Returns up to `batch_size` records.
    ///
    /// Waits at most `timeout` for the first record and then takes whatever
    /// is already buffered. An empty result means the timeout elapsed or the
    /// channel is closed and drained.
    pub async fn fetch_records(&mut self, batch_size: usize, timeout: Duration) -> Vec<Record> {
        let mut records = Vec::new();
        if batch_size == 0 || self.drained {
            return records;
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => return records,
            Ok(None) => {
                self.drained = true;
                return records;
            }
            Ok(Some(record)) => records.push(record),
        }

        while records.len() < batch_size {
            match self.rx.try_recv() {
                Ok(record) => records.push(record),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.drained = true;
                    break;
                }
            }
        }
        records
    }

    /// Stops accepting new records. Buffered records can still be fetched.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Closed and nothing left to fetch.
    pub fn is_drained(&self) -> bool {
        self.drained || (self.rx.is_closed() && self.rx.is_empty())
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::position::Position;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn placeholders(from: u64, n: u64) -> Vec<Record> {
        (from..from + n)
            .map(|lsn| Record::placeholder(Position::Log { lsn }))
            .collect()
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn producer_blocks_beyond_capacity_and_nothing_is_dropped() {
        let (tx, mut rx) = channel(4);
        let cancel = CancellationToken::new();
        let pushed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let pushed = pushed.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for lsn in 0..10 {
                    tx.push(Record::placeholder(Position::Log { lsn }), &cancel)
                        .await
                        .unwrap();
                    pushed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 4);

        let mut received = Vec::new();
        while received.len() < 10 {
            received.extend(rx.fetch_records(3, Duration::from_secs(1)).await);
        }
        producer.await.unwrap();

        let positions: Vec<_> = received.iter().map(|r| r.position().clone()).collect();
        let expected: Vec<_> = (0..10).map(|lsn| Position::Log { lsn }).collect();
        assert_eq!(positions, expected);
    }

    #[tokio::test]
    async fn fetch_returns_empty_on_timeout() {
        let (_tx, mut rx) = channel(4);
        assert!(rx.fetch_records(10, SHORT).await.is_empty());
        assert!(!rx.is_drained());
    }

    #[tokio::test]
    async fn fetch_takes_at_most_batch_size() {
        let (tx, mut rx) = channel(10);
        tx.push_batch(placeholders(0, 5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rx.fetch_records(3, SHORT).await.len(), 3);
        assert_eq!(rx.fetch_records(3, SHORT).await.len(), 2);
    }

    #[tokio::test]
    async fn cancel_unblocks_full_channel() {
        let (tx, _rx) = channel(2);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.push_batch(placeholders(0, 5), &cancel).await })
        };

        tokio::time::sleep(SHORT).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Err(ChannelError::Cancelled));
    }

    #[tokio::test]
    async fn close_drains_buffered_records_then_stays_empty() {
        let (tx, mut rx) = channel(10);
        tx.push_batch(placeholders(0, 3), &CancellationToken::new())
            .await
            .unwrap();
        rx.close();

        assert_eq!(
            tx.push_batch(placeholders(3, 1), &CancellationToken::new())
                .await,
            Err(ChannelError::Closed)
        );
        assert_eq!(rx.fetch_records(10, SHORT).await.len(), 3);
        assert!(rx.fetch_records(10, SHORT).await.is_empty());
        assert!(rx.is_drained());
    }

    #[tokio::test]
    async fn dropping_senders_closes_channel() {
        let (tx, mut rx) = channel(10);
        let tx2 = tx.clone();
        tx2.push_batch(placeholders(0, 1), &CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        drop(tx2);

        assert_eq!(rx.fetch_records(10, SHORT).await.len(), 1);
        assert!(rx.fetch_records(10, SHORT).await.is_empty());
        assert!(rx.is_drained());
    }
}
