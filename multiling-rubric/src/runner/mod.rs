//! Experiment execution engine

pub mod executor;
pub mod rate_limiter;
pub mod retry;

pub use executor::{
    ConsoleProgress, Executor, ExecutorConfig, NoOpProgress, ProgressCallback, QueryJob,
    RunSummary,
};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, Transient};
