//! Orchestrated job mechanics (framework only, no settlement rules).
//!
//! - A job is a start-up hook, a body of tasks and child jobs, and a tear-down hook
//! - Every unit reports an [`ExecutionResult`]; the most severe one wins
//! - Synchronous bodies run in order and abort on `TerminalError`
//! - Asynchronous bodies run every unit concurrently and aggregate
//!
//! Infra is responsible for building jobs per scheduled run, running them
//! through [`JobOrchestrator`] and acting on the rescheduling decision.

pub mod job;
pub mod orchestrator;
pub mod result;

pub use job::{JobScheduler, OrchestratedJob, OrchestratedTask, ScheduledJobDetails, SchedulerError};
pub use orchestrator::JobOrchestrator;
pub use result::{ExecutionResult, Reschedule};
