//! Scheduled job records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardrecon_core::JobId;
use cardrecon_orchestration::{ExecutionResult, Reschedule, ScheduledJobDetails};

/// Run records kept per job.
const MAX_HISTORY: usize = 20;

/// Scheduling status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobStatus {
    /// Waiting for `next_run_at`
    Pending,
    /// Claimed by a worker
    Running,
    /// Out of the schedule until an operator releases it
    Held { reason: String },
}

/// Record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: ExecutionResult,
    pub duration_ms: u64,
}

/// A recurring job and its schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub details: ScheduledJobDetails,
    /// Time between regular runs.
    pub interval: Duration,
    /// Time before re-running after a `NonTerminalError`.
    pub retry_interval: Duration,
    pub status: ScheduledJobStatus,
    pub next_run_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent runs, oldest first.
    pub history: Vec<JobRunRecord>,
}

impl ScheduledJob {
    /// Create a job that is due immediately.
    pub fn new(details: ScheduledJobDetails, interval: Duration) -> Self {
        let now = Utc::now();
        Self {
            details,
            interval,
            retry_interval: interval,
            status: ScheduledJobStatus::Pending,
            next_run_at: now,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = at;
        self
    }

    pub fn id(&self) -> JobId {
        self.details.job_id
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledJobStatus::Pending && self.next_run_at <= now
    }

    pub fn is_held(&self) -> bool {
        matches!(self.status, ScheduledJobStatus::Held { .. })
    }

    pub fn mark_running(&mut self) {
        self.status = ScheduledJobStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Record a finished run and reschedule accordingly.
    pub fn record_result(&mut self, result: ExecutionResult, started_at: DateTime<Utc>) -> Reschedule {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(JobRunRecord {
            started_at,
            finished_at: now,
            result,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        let decision = result.reschedule();
        match decision {
            Reschedule::NextRun => {
                self.consecutive_failures = 0;
                self.status = ScheduledJobStatus::Pending;
                self.next_run_at = now + chrono::Duration::from_std(self.interval).unwrap_or_default();
            }
            Reschedule::RetryNextTick => {
                self.consecutive_failures += 1;
                self.status = ScheduledJobStatus::Pending;
                self.next_run_at = now + chrono::Duration::from_std(self.retry_interval).unwrap_or_default();
            }
            Reschedule::Hold => {
                self.consecutive_failures += 1;
                self.hold("run ended with a terminal error");
            }
        }
        decision
    }

    pub fn hold(&mut self, reason: impl Into<String>) {
        self.status = ScheduledJobStatus::Held {
            reason: reason.into(),
        };
        self.updated_at = Utc::now();
    }

    /// Put a held job back in the schedule, due now.
    pub fn release(&mut self) {
        let now = Utc::now();
        self.status = ScheduledJobStatus::Pending;
        self.next_run_at = now;
        self.updated_at = now;
    }
}
