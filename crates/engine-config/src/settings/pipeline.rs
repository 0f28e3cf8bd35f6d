use crate::settings::algorithm::AlgorithmConfig;
use engine_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Tuning of the dumper -> channel -> importer pipeline of every shard item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    pub read: ReadConfig,
    pub write: WriteConfig,
    pub channel: ChannelConfig,
    /// How long the importer waits for the first record of a batch.
    pub fetch_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read: ReadConfig::default(),
            write: WriteConfig::default(),
            channel: ChannelConfig::default(),
            fetch_timeout_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReadConfig {
    /// Rows per inventory page and records per channel push.
    pub batch_size: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WriteConfig {
    /// Records fetched per importer cycle and statements per executed batch.
    pub batch_size: usize,
    pub retry_times: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub rate_limiter: Option<AlgorithmConfig>,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_times: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5000,
            rate_limiter: None,
        }
    }
}

impl WriteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.retry_times,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChannelConfig {
    /// Maximum records buffered between dumper and importer.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
