//! Job and task contracts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cardrecon_core::JobId;

use crate::result::ExecutionResult;

/// What the scheduler hands to a job for one run.
///
/// `payload` carries resumable state between runs (e.g. the last successful
/// run date); jobs parse it into their own typed state at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJobDetails {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: BTreeMap<String, String>,
}

impl ScheduledJobDetails {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            job_type: job_type.into(),
            payload: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn payload_value(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduled job not found: {0}")]
    NotFound(JobId),
    #[error("scheduler storage error: {0}")]
    Storage(String),
}

/// Scheduler handle given to a job at initialization.
pub trait JobScheduler: Send + Sync {
    /// Persist a job's payload so the next run resumes from it.
    fn update_payload(&self, job_id: JobId, payload: BTreeMap<String, String>) -> Result<(), SchedulerError>;
}

/// Smallest unit of work in a job.
#[async_trait]
pub trait OrchestratedTask: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self) -> ExecutionResult;
}

/// A unit of scheduled work: hooks, tasks and child jobs.
///
/// Instances are built per scheduled run, initialized once, executed once by
/// [`crate::JobOrchestrator`] and dropped.
#[async_trait]
pub trait OrchestratedJob: Send + Sync {
    fn name(&self) -> &str;

    /// Bind the job to this run's details and the scheduler handle.
    fn initialize(&mut self, details: ScheduledJobDetails, scheduler: Arc<dyn JobScheduler>);

    fn tasks(&self) -> Vec<Arc<dyn OrchestratedTask>>;

    fn child_jobs(&self) -> Vec<Arc<dyn OrchestratedJob>> {
        Vec::new()
    }

    /// Run every task and child job concurrently instead of in order.
    fn asynchronous(&self) -> bool {
        false
    }

    /// In synchronous mode, run tasks before child jobs.
    fn tasks_first(&self) -> bool {
        true
    }

    async fn start_up(&self) -> ExecutionResult {
        ExecutionResult::Success
    }

    /// Runs after the body (or after a failed start-up) with the aggregate
    /// result; its return value is the job's final result.
    async fn tear_down(&self, result: ExecutionResult) -> ExecutionResult {
        result
    }
}
