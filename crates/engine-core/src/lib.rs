pub mod error;
pub mod metrics;
pub mod props;
pub mod rate_limit;
pub mod retry;
pub mod state;
