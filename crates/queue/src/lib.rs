//! Redis-backed delivery queue: durable batch jobs, shared rate limiting
//! and the dispatcher that drains them.

pub mod batch;
pub mod dispatcher;
pub mod jobs;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use batch::{BatchConfig, BatchOrchestrator};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use jobs::SendBatchJob;
pub use rate_limit::{Reservation, SendRateLimiter};
pub use retry::RetryConfig;
pub use scheduler::{SchedulerConfig, run_scheduler};
pub use store::{Job, JobCounts, JobState, JobStore, connect_redis};
