//! Record producers feeding a shard item's channel.

use crate::{channel::RecordSender, error::DumperError};
use async_trait::async_trait;
use model::position::Position;
use tokio_util::sync::CancellationToken;

pub mod inventory;
pub mod memory_log;

#[async_trait]
pub trait Dumper: Send + Sync {
    /// Pushes records until the source is exhausted (ending with a
    /// `Finished` record) or `cancel` fires.
    async fn run(&mut self, sender: RecordSender, cancel: CancellationToken) -> Result<(), DumperError>;
}

/// A dumper reading a change stream.
#[async_trait]
pub trait IncrementalDumper: Dumper {
    /// Head of the change stream right now. Captured before the inventory
    /// scan so no change made during the scan is missed.
    async fn current_position(&self) -> Result<Position, DumperError>;

    /// Continues capture strictly after `position`.
    fn seek(&mut self, position: &Position) -> Result<(), DumperError>;
}
