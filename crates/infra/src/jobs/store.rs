//! Scheduled job storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use cardrecon_core::JobId;
use cardrecon_orchestration::{ExecutionResult, JobScheduler, SchedulerError};

use super::types::{ScheduledJob, ScheduledJobStatus};

/// Scheduled job store abstraction.
///
/// Also serves as the [`JobScheduler`] handle jobs use to persist their
/// payload between runs.
pub trait ScheduledJobStore: JobScheduler + Send + Sync {
    /// Add a job to the schedule.
    fn enqueue(&self, job: ScheduledJob) -> Result<JobId, JobStoreError>;

    fn get(&self, job_id: JobId) -> Result<Option<ScheduledJob>, JobStoreError>;

    /// Claim the due job with the earliest `next_run_at` and mark it running.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ScheduledJob>, JobStoreError>;

    /// Record a finished run and reschedule the job.
    fn complete(
        &self,
        job_id: JobId,
        result: ExecutionResult,
        started_at: DateTime<Utc>,
    ) -> Result<ScheduledJob, JobStoreError>;

    /// Take a job out of the schedule.
    fn hold(&self, job_id: JobId, reason: &str) -> Result<ScheduledJob, JobStoreError>;

    fn list_held(&self) -> Result<Vec<ScheduledJob>, JobStoreError>;

    /// Put a held job back in the schedule, due now.
    fn release(&self, job_id: JobId) -> Result<ScheduledJob, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is not held")]
    NotHeld(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory scheduled job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryScheduledJobStore {
    jobs: RwLock<HashMap<JobId, ScheduledJob>>,
}

impl InMemoryScheduledJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, job_id: JobId, f: F) -> Result<ScheduledJob, JobStoreError>
    where
        F: FnOnce(&mut ScheduledJob) -> Result<(), JobStoreError>,
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        f(job)?;
        Ok(job.clone())
    }
}

impl ScheduledJobStore for InMemoryScheduledJobStore {
    fn enqueue(&self, job: ScheduledJob) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let id = job.id();
        if jobs.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<ScheduledJob>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ScheduledJob>, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();

        let next = jobs
            .values()
            .filter(|j| j.is_due(now))
            .min_by_key(|j| (j.next_run_at, j.created_at))
            .map(ScheduledJob::id);

        Ok(next.and_then(|id| {
            let job = jobs.get_mut(&id)?;
            job.mark_running();
            Some(job.clone())
        }))
    }

    fn complete(
        &self,
        job_id: JobId,
        result: ExecutionResult,
        started_at: DateTime<Utc>,
    ) -> Result<ScheduledJob, JobStoreError> {
        self.update(job_id, |job| {
            job.record_result(result, started_at);
            Ok(())
        })
    }

    fn hold(&self, job_id: JobId, reason: &str) -> Result<ScheduledJob, JobStoreError> {
        self.update(job_id, |job| {
            job.hold(reason);
            Ok(())
        })
    }

    fn list_held(&self) -> Result<Vec<ScheduledJob>, JobStoreError> {
        let mut held: Vec<_> = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.is_held())
            .cloned()
            .collect();
        held.sort_by_key(|j| j.updated_at);
        Ok(held)
    }

    fn release(&self, job_id: JobId) -> Result<ScheduledJob, JobStoreError> {
        self.update(job_id, |job| {
            if !job.is_held() {
                return Err(JobStoreError::NotHeld(job_id));
            }
            job.release();
            Ok(())
        })
    }
}

impl JobScheduler for InMemoryScheduledJobStore {
    fn update_payload(
        &self,
        job_id: JobId,
        payload: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError> {
        self.update(job_id, |job| {
            job.details.payload = payload;
            Ok(())
        })
        .map(|_| ())
        .map_err(|e| match e {
            JobStoreError::NotFound(id) => SchedulerError::NotFound(id),
            other => SchedulerError::Storage(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cardrecon_orchestration::ScheduledJobDetails;

    fn job(job_type: &str) -> ScheduledJob {
        ScheduledJob::new(ScheduledJobDetails::new(job_type), Duration::from_secs(60))
    }

    #[test]
    fn claims_earliest_due_job_once() {
        let store = InMemoryScheduledJobStore::new();
        let now = Utc::now();
        let later = store
            .enqueue(job("later").starting_at(now - chrono::Duration::seconds(1)))
            .unwrap();
        let first = store
            .enqueue(job("first").starting_at(now - chrono::Duration::seconds(10)))
            .unwrap();
        store
            .enqueue(job("future").starting_at(now + chrono::Duration::hours(1)))
            .unwrap();

        assert_eq!(store.claim_next(now).unwrap().map(|j| j.id()), Some(first));
        assert_eq!(store.claim_next(now).unwrap().map(|j| j.id()), Some(later));
        assert!(store.claim_next(now).unwrap().is_none());
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let store = InMemoryScheduledJobStore::new();
        let j = job("x");
        store.enqueue(j.clone()).unwrap();
        assert_eq!(store.enqueue(j.clone()), Err(JobStoreError::AlreadyExists(j.id())));
    }

    #[test]
    fn held_jobs_are_listed_and_released() {
        let store = InMemoryScheduledJobStore::new();
        let id = store.enqueue(job("x")).unwrap();
        store.claim_next(Utc::now()).unwrap();
        store.complete(id, ExecutionResult::TerminalError, Utc::now()).unwrap();

        assert!(store.claim_next(Utc::now()).unwrap().is_none());
        assert_eq!(store.list_held().unwrap().len(), 1);

        store.release(id).unwrap();
        assert!(store.list_held().unwrap().is_empty());
        assert_eq!(store.claim_next(Utc::now()).unwrap().map(|j| j.id()), Some(id));
        assert!(matches!(store.release(id), Err(JobStoreError::NotHeld(held)) if held == id));
    }

    #[test]
    fn payload_updates_reach_the_next_run() {
        let store = InMemoryScheduledJobStore::new();
        let id = store.enqueue(job("x")).unwrap();

        let mut payload = BTreeMap::new();
        payload.insert("sequence_number".to_string(), "8".to_string());
        store.update_payload(id, payload).unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.details.payload_value("sequence_number"), Some("8"));

        let missing = JobId::new();
        assert_eq!(
            store.update_payload(missing, BTreeMap::new()),
            Err(SchedulerError::NotFound(missing))
        );
    }
}
