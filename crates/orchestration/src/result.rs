use serde::{Deserialize, Serialize};

/// Outcome of a task, a job body or a whole job.
///
/// Ordered by severity so that aggregation is `max`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Success,
    /// Retry this job on the next scheduled run.
    NonTerminalError,
    /// Do not reschedule automatically; an operator has to step in.
    TerminalError,
}

/// What the scheduler should do with a job after a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reschedule {
    /// Schedule the next regular run.
    NextRun,
    /// Run again on the next scheduler tick.
    RetryNextTick,
    /// Keep the job out of the schedule until released.
    Hold,
}

impl ExecutionResult {
    /// Combine two results; the more severe one wins.
    pub fn aggregate(self, other: ExecutionResult) -> ExecutionResult {
        self.max(other)
    }

    /// Aggregate any number of results (`Success` when empty).
    pub fn aggregate_all(results: impl IntoIterator<Item = ExecutionResult>) -> ExecutionResult {
        results
            .into_iter()
            .fold(ExecutionResult::Success, ExecutionResult::aggregate)
    }

    pub fn is_success(&self) -> bool {
        *self == ExecutionResult::Success
    }

    pub fn reschedule(&self) -> Reschedule {
        match self {
            ExecutionResult::Success => Reschedule::NextRun,
            ExecutionResult::NonTerminalError => Reschedule::RetryNextTick,
            ExecutionResult::TerminalError => Reschedule::Hold,
        }
    }
}
