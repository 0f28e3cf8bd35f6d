//! Throughput throttling for importer writes and checker reads.

#![allow(clippy::cast_precision_loss)]

use crate::{
    error::AlgorithmError,
    props::{Props, positive_u64},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// A pluggable rate-limit algorithm.
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + fmt::Debug {
    /// Waits until a batch of `statements` statements may run.
    async fn acquire(&self, statements: usize);

    fn name(&self) -> &'static str;
}

/// Token bucket with debt: a request larger than the available tokens is
/// admitted once, and the caller sleeps for the time needed to repay it.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens that can accumulate.
    capacity: f64,
    state: Arc<Mutex<TokenBucketState>>,
}

#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_second: u64) -> Self {
        let rate = rate_per_second.max(1) as f64;
        Self {
            rate,
            capacity: rate,
            state: Arc::new(Mutex::new(TokenBucketState {
                tokens: rate,
                last_update: Instant::now(),
            })),
        }
    }

    fn refill(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_update = now;
    }

    /// Takes `permits` tokens and returns how long the caller must wait.
    fn reserve(&self, permits: usize) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens -= permits as f64;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.rate)
        }
    }

    pub async fn acquire(&self, permits: usize) {
        if permits == 0 {
            return;
        }
        let wait = self.reserve(permits);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Current available tokens (negative while in debt).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

/// Limits executed statements per second.
#[derive(Debug, Clone)]
pub struct QpsRateLimit {
    bucket: TokenBucket,
}

impl QpsRateLimit {
    pub fn new(qps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(qps),
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for QpsRateLimit {
    async fn acquire(&self, statements: usize) {
        self.bucket.acquire(statements).await;
    }

    fn name(&self) -> &'static str {
        "QPS"
    }
}

/// Limits committed transactions (batches) per second.
#[derive(Debug, Clone)]
pub struct TpsRateLimit {
    bucket: TokenBucket,
}

impl TpsRateLimit {
    pub fn new(tps: u64) -> Self {
        Self {
            bucket: TokenBucket::new(tps),
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for TpsRateLimit {
    async fn acquire(&self, _statements: usize) {
        self.bucket.acquire(1).await;
    }

    fn name(&self) -> &'static str {
        "TPS"
    }
}

/// Resolves rate-limit algorithms by name.
pub struct RateLimitRegistry;

impl RateLimitRegistry {
    pub const NAMES: [&'static str; 2] = ["QPS", "TPS"];

    pub fn create(name: &str, props: &Props) -> Result<Arc<dyn RateLimitAlgorithm>, AlgorithmError> {
        match name.to_ascii_uppercase().as_str() {
            "QPS" => Ok(Arc::new(QpsRateLimit::new(positive_u64(
                "QPS", props, "qps", None,
            )?))),
            "TPS" => Ok(Arc::new(TpsRateLimit::new(positive_u64(
                "TPS", props, "tps", None,
            )?))),
            _ => Err(AlgorithmError::Unknown {
                kind: "rate limit",
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(key: &str, value: u64) -> Props {
        Props::from([(key.to_string(), json!(value))])
    }

    #[tokio::test]
    async fn burst_within_capacity_does_not_wait() {
        let bucket = TokenBucket::new(1000);
        let start = Instant::now();
        bucket.acquire(500).await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn exceeding_capacity_waits_for_refill() {
        let limiter = QpsRateLimit::new(100);
        let start = Instant::now();
        limiter.acquire(100).await;
        limiter.acquire(10).await;
        // 10 statements over budget at 100/s is roughly 100ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn tps_counts_batches_not_statements() {
        let limiter = TpsRateLimit::new(1000);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(10_000).await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn registry_resolves_by_name() {
        let qps = RateLimitRegistry::create("qps", &props("qps", 50)).unwrap();
        assert_eq!(qps.name(), "QPS");
        let tps = RateLimitRegistry::create("TPS", &props("tps", 5)).unwrap();
        assert_eq!(tps.name(), "TPS");
    }

    #[test]
    fn registry_rejects_unknown_or_misconfigured() {
        assert!(matches!(
            RateLimitRegistry::create("LEAKY", &Props::new()),
            Err(AlgorithmError::Unknown { .. })
        ));
        assert!(matches!(
            RateLimitRegistry::create("QPS", &props("tps", 5)),
            Err(AlgorithmError::InvalidProperty { .. })
        ));
    }
}
