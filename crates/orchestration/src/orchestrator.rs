//! Job execution: start-up, body, tear-down.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::job::{OrchestratedJob, OrchestratedTask};
use crate::result::ExecutionResult;

type BoxedRun = Pin<Box<dyn Future<Output = ExecutionResult> + Send + 'static>>;

/// Runs orchestrated jobs.
///
/// - `start_up` runs first; anything but `Success` skips the body
/// - the body runs tasks and child jobs per the job's flags
/// - `tear_down` always runs with the aggregate and decides the final result
#[derive(Debug, Default, Clone, Copy)]
pub struct JobOrchestrator;

impl JobOrchestrator {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, job: Arc<dyn OrchestratedJob>) -> ExecutionResult {
        run_job(job).await
    }
}

fn run_job(job: Arc<dyn OrchestratedJob>) -> BoxedRun {
    Box::pin(async move {
        let name = job.name().to_string();
        debug!(job = %name, "starting job");

        let started = {
            let job = job.clone();
            guarded(&name, "start_up", async move { job.start_up().await }).await
        };
        let body = if started.is_success() {
            run_body(&job).await
        } else {
            warn!(job = %name, result = ?started, "start-up failed; skipping job body");
            started
        };

        let finished = {
            let job = job.clone();
            guarded(&name, "tear_down", async move { job.tear_down(body).await }).await
        };
        if body == ExecutionResult::TerminalError && finished < ExecutionResult::TerminalError {
            error!(
                job = %name,
                body = ?body,
                reported = ?finished,
                "tear-down downgraded a terminal error"
            );
        }

        match finished {
            ExecutionResult::TerminalError => error!(job = %name, "job ended with terminal error"),
            ExecutionResult::NonTerminalError => warn!(job = %name, "job ended with non-terminal error"),
            ExecutionResult::Success => info!(job = %name, "job completed"),
        }
        finished
    })
}

async fn run_body(job: &Arc<dyn OrchestratedJob>) -> ExecutionResult {
    let name = job.name().to_string();
    let tasks = job.tasks();
    let children = job.child_jobs();

    if job.asynchronous() {
        return run_concurrently(&name, tasks, children).await;
    }

    let (first, second) = if job.tasks_first() {
        (run_tasks_in_order(&name, &tasks).await, Phase::Children)
    } else {
        (run_children_in_order(&name, &children).await, Phase::Tasks)
    };
    if first == ExecutionResult::TerminalError {
        return first;
    }

    let rest = match second {
        Phase::Children => run_children_in_order(&name, &children).await,
        Phase::Tasks => run_tasks_in_order(&name, &tasks).await,
    };
    first.aggregate(rest)
}

enum Phase {
    Tasks,
    Children,
}

async fn run_tasks_in_order(job: &str, tasks: &[Arc<dyn OrchestratedTask>]) -> ExecutionResult {
    let mut result = ExecutionResult::Success;
    for (idx, task) in tasks.iter().enumerate() {
        let unit = task.clone();
        let outcome = guarded(job, task.name(), async move { unit.execute().await }).await;
        debug!(job, task = task.name(), result = ?outcome, "task finished");
        result = result.aggregate(outcome);
        if outcome == ExecutionResult::TerminalError {
            warn!(
                job,
                task = task.name(),
                skipped = tasks.len() - idx - 1,
                "terminal error; aborting remaining tasks"
            );
            break;
        }
    }
    result
}

async fn run_children_in_order(job: &str, children: &[Arc<dyn OrchestratedJob>]) -> ExecutionResult {
    let mut result = ExecutionResult::Success;
    for (idx, child) in children.iter().enumerate() {
        let outcome = run_job(child.clone()).await;
        result = result.aggregate(outcome);
        if outcome == ExecutionResult::TerminalError {
            warn!(
                job,
                child = child.name(),
                skipped = children.len() - idx - 1,
                "terminal error; aborting remaining child jobs"
            );
            break;
        }
    }
    result
}

/// Run one unit on its own tokio task so a panic surfaces as `TerminalError`
/// instead of unwinding through the job.
async fn guarded<F>(job: &str, unit: &str, run: F) -> ExecutionResult
where
    F: Future<Output = ExecutionResult> + Send + 'static,
{
    match tokio::spawn(run).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(job, unit, error = %err, "unit panicked or was cancelled");
            ExecutionResult::TerminalError
        }
    }
}

async fn run_concurrently(
    job: &str,
    tasks: Vec<Arc<dyn OrchestratedTask>>,
    children: Vec<Arc<dyn OrchestratedJob>>,
) -> ExecutionResult {
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(async move { task.execute().await });
    }
    for child in children {
        set.spawn(run_job(child));
    }

    let mut result = ExecutionResult::Success;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => result = result.aggregate(outcome),
            Err(err) => {
                error!(job, error = %err, "unit panicked or was cancelled");
                result = result.aggregate(ExecutionResult::TerminalError);
            }
        }
    }
    result
}
