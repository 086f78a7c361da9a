//! Scheduled jobs: storage, rescheduling and the worker pool.
//!
//! ## Components
//!
//! - `ScheduledJob`: job details plus its schedule and run history
//! - `ScheduledJobStore`: persistence, also the jobs' scheduler handle
//! - `JobExecutor`: worker loops running due jobs through the orchestrator
//!
//! After every run the job's [`ExecutionResult`](cardrecon_orchestration::ExecutionResult)
//! decides what happens next: the regular interval on success, the retry
//! interval on a non-terminal error, a hold on a terminal error.

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobFactory};
pub use store::{InMemoryScheduledJobStore, JobStoreError, ScheduledJobStore};
pub use types::{JobRunRecord, ScheduledJob, ScheduledJobStatus};
