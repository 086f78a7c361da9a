//! Scheduled job executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cardrecon_core::JobId;
use cardrecon_orchestration::{ExecutionResult, JobOrchestrator, JobScheduler, OrchestratedJob, Reschedule};

use super::store::{JobStoreError, ScheduledJobStore};
use super::types::ScheduledJob;
use crate::shutdown::ShutdownSignal;

/// Builds a fresh job instance for one run.
pub type JobFactory = Box<dyn Fn() -> Box<dyn OrchestratedJob> + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often an idle worker polls for due jobs
    pub poll_interval: Duration,
    /// Worker loops, i.e. jobs running at the same time
    pub max_workers: usize,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_workers: 4,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    signal: ShutdownSignal,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Signal shutdown and wait for every worker to finish its current job.
    pub async fn shutdown(self) {
        self.signal.trigger();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "job worker ended abnormally");
            }
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_held: u64,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, result: ExecutionResult) {
        self.jobs_processed += 1;
        match result {
            ExecutionResult::Success => self.jobs_succeeded += 1,
            ExecutionResult::NonTerminalError => self.jobs_retried += 1,
            ExecutionResult::TerminalError => self.jobs_held += 1,
        }
    }
}

/// Runs due scheduled jobs through the [`JobOrchestrator`].
///
/// A job type maps to a factory; every run gets a fresh instance,
/// initialized with the stored details and the store as its scheduler.
pub struct JobExecutor<S: ScheduledJobStore> {
    store: Arc<S>,
    factories: HashMap<String, JobFactory>,
    orchestrator: JobOrchestrator,
}

impl<S: ScheduledJobStore + 'static> JobExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            factories: HashMap::new(),
            orchestrator: JobOrchestrator::new(),
        }
    }

    /// Register the factory for a job type.
    pub fn register_factory<F>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn OrchestratedJob> + Send + Sync + 'static,
    {
        self.factories.insert(job_type.into(), Box::new(factory));
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Claim and run the next due job, if any.
    pub async fn run_once(&self) -> Result<Option<(JobId, ExecutionResult)>, JobStoreError> {
        let Some(job) = self.store.claim_next(Utc::now())? else {
            return Ok(None);
        };
        let job_id = job.id();
        let result = self.execute(job).await?;
        Ok(Some((job_id, result)))
    }

    /// Run a claimed job and apply the rescheduling decision.
    pub async fn execute(&self, job: ScheduledJob) -> Result<ExecutionResult, JobStoreError> {
        let job_id = job.id();
        let job_type = job.details.job_type.clone();

        let Some(factory) = self.factories.get(&job_type) else {
            warn!(%job_id, job_type, "no factory for job type; holding job");
            self.store
                .hold(job_id, &format!("no factory registered for job type {job_type}"))?;
            return Ok(ExecutionResult::TerminalError);
        };

        let started_at = Utc::now();
        let mut instance = factory();
        let scheduler: Arc<dyn JobScheduler> = self.store.clone();
        instance.initialize(job.details, scheduler);

        debug!(%job_id, job_type, "running scheduled job");
        let result = self.orchestrator.execute(Arc::from(instance)).await;
        let updated = self.store.complete(job_id, result, started_at)?;

        match result.reschedule() {
            Reschedule::NextRun => {
                info!(%job_id, job_type, next_run_at = %updated.next_run_at, "scheduled job succeeded");
            }
            Reschedule::RetryNextTick => {
                warn!(
                    %job_id,
                    job_type,
                    consecutive_failures = updated.consecutive_failures,
                    next_run_at = %updated.next_run_at,
                    "scheduled job failed; retrying next tick"
                );
            }
            Reschedule::Hold => {
                error!(%job_id, job_type, "scheduled job hit a terminal error; held for operator intervention");
            }
        }
        Ok(result)
    }

    /// Spawn `max_workers` worker loops on the current tokio runtime.
    ///
    /// Workers stop once `signal` is triggered; a job in progress is
    /// finished first (its retry waits are cut short if the invocation
    /// engine shares the same signal).
    pub fn spawn(self, config: JobExecutorConfig, signal: ShutdownSignal) -> JobExecutorHandle {
        let executor = Arc::new(self);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let started = Instant::now();

        let workers = (0..config.max_workers.max(1))
            .map(|idx| {
                let worker = format!("{}-{idx}", config.name);
                tokio::spawn(worker_loop(
                    executor.clone(),
                    worker,
                    config.poll_interval,
                    signal.subscribe(),
                    stats.clone(),
                    started,
                ))
            })
            .collect();

        JobExecutorHandle {
            signal,
            workers,
            stats,
        }
    }
}

async fn worker_loop<S: ScheduledJobStore + 'static>(
    executor: Arc<JobExecutor<S>>,
    worker: String,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
) {
    info!(%worker, "job worker started");

    while !*shutdown.borrow() {
        let idle = match executor.run_once().await {
            Ok(Some((_, result))) => {
                let mut s = stats.lock().unwrap();
                s.record(result);
                s.uptime_secs = started.elapsed().as_secs();
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(%worker, error = %e, "job store call failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }
    }

    info!(%worker, "job worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use cardrecon_orchestration::{OrchestratedTask, ScheduledJobDetails};

    use crate::jobs::store::InMemoryScheduledJobStore;
    use crate::jobs::types::ScheduledJobStatus;

    /// Job with no tasks that reports a fixed result and bumps a payload
    /// counter on every run.
    struct CountingJob {
        result: ExecutionResult,
        runs: Arc<AtomicU32>,
        details: Option<ScheduledJobDetails>,
        scheduler: Option<Arc<dyn JobScheduler>>,
    }

    #[async_trait]
    impl OrchestratedJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&mut self, details: ScheduledJobDetails, scheduler: Arc<dyn JobScheduler>) {
            self.details = Some(details);
            self.scheduler = Some(scheduler);
        }

        fn tasks(&self) -> Vec<Arc<dyn OrchestratedTask>> {
            Vec::new()
        }

        async fn tear_down(&self, _result: ExecutionResult) -> ExecutionResult {
            let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if let (Some(details), Some(scheduler)) = (&self.details, &self.scheduler) {
                let mut payload = BTreeMap::new();
                payload.insert("runs".to_string(), runs.to_string());
                let _ = scheduler.update_payload(details.job_id, payload);
            }
            self.result
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl OrchestratedJob for PanickingJob {
        fn name(&self) -> &str {
            "panicking"
        }

        fn initialize(&mut self, _details: ScheduledJobDetails, _scheduler: Arc<dyn JobScheduler>) {}

        fn tasks(&self) -> Vec<Arc<dyn OrchestratedTask>> {
            Vec::new()
        }

        async fn start_up(&self) -> ExecutionResult {
            panic!("start-up blew up");
        }
    }

    fn executor(result: ExecutionResult) -> (JobExecutor<InMemoryScheduledJobStore>, Arc<AtomicU32>) {
        let store = Arc::new(InMemoryScheduledJobStore::new());
        let runs = Arc::new(AtomicU32::new(0));
        let mut executor = JobExecutor::new(store);
        let counter = runs.clone();
        executor.register_factory("counting", move || {
            Box::new(CountingJob {
                result,
                runs: counter.clone(),
                details: None,
                scheduler: None,
            }) as Box<dyn OrchestratedJob>
        });
        (executor, runs)
    }

    fn schedule(executor: &JobExecutor<InMemoryScheduledJobStore>, job_type: &str) -> JobId {
        let job = ScheduledJob::new(ScheduledJobDetails::new(job_type), Duration::from_secs(3600))
            .with_retry_interval(Duration::from_secs(30));
        executor.store().enqueue(job).unwrap()
    }

    #[tokio::test]
    async fn successful_run_is_rescheduled_with_its_payload() {
        let (executor, runs) = executor(ExecutionResult::Success);
        let id = schedule(&executor, "counting");

        assert_eq!(executor.run_once().await.unwrap(), Some((id, ExecutionResult::Success)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let stored = executor.store().get(id).unwrap().unwrap();
        assert_eq!(stored.status, ScheduledJobStatus::Pending);
        assert_eq!(stored.details.payload_value("runs"), Some("1"));
        assert!(executor.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_terminal_error_stays_scheduled() {
        let (executor, _) = executor(ExecutionResult::NonTerminalError);
        let id = schedule(&executor, "counting");

        executor.run_once().await.unwrap();
        let stored = executor.store().get(id).unwrap().unwrap();
        assert_eq!(stored.status, ScheduledJobStatus::Pending);
        assert_eq!(stored.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn terminal_error_holds_the_job() {
        let (executor, _) = executor(ExecutionResult::TerminalError);
        let id = schedule(&executor, "counting");

        executor.run_once().await.unwrap();
        let held = executor.store().list_held().unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id(), id);
    }

    #[tokio::test]
    async fn panicking_job_is_held_not_left_running() {
        let (mut executor, _) = executor(ExecutionResult::Success);
        executor.register_factory("panicking", || Box::new(PanickingJob) as Box<dyn OrchestratedJob>);
        let id = schedule(&executor, "panicking");

        assert_eq!(executor.run_once().await.unwrap(), Some((id, ExecutionResult::TerminalError)));
        let stored = executor.store().get(id).unwrap().unwrap();
        assert!(matches!(stored.status, ScheduledJobStatus::Held { .. }));
    }

    #[tokio::test]
    async fn unknown_job_type_is_held() {
        let (executor, runs) = executor(ExecutionResult::Success);
        let id = schedule(&executor, "mystery");

        assert_eq!(executor.run_once().await.unwrap(), Some((id, ExecutionResult::TerminalError)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let stored = executor.store().get(id).unwrap().unwrap();
        assert!(matches!(stored.status, ScheduledJobStatus::Held { reason } if reason.contains("mystery")));
    }

    #[tokio::test]
    async fn workers_run_due_jobs_until_shutdown() {
        let (executor, runs) = executor(ExecutionResult::Success);
        schedule(&executor, "counting");
        schedule(&executor, "counting");

        let config = JobExecutorConfig::default()
            .with_max_workers(2)
            .with_poll_interval(Duration::from_millis(5));
        let handle = executor.spawn(config, ShutdownSignal::new());

        for _ in 0..200 {
            if handle.stats().jobs_processed >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(handle.stats().jobs_succeeded, 2);
        handle.shutdown().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
