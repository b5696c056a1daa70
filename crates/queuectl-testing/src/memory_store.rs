//! An in-memory [`Store`] used by `queuectl-core`'s own unit tests and by
//! downstream integration tests. Mirrors the SQLite store's state-machine
//! semantics exactly — see `queuectl-sqlite` for the production
//! implementation grounded in the same invariants.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use queuectl_core::job::{Job, JobState, NewJob};
use queuectl_core::retry::Decision;
use queuectl_core::store::{Counts, Store};
use queuectl_core::StoreError;

use crate::recorder::AcquisitionRecorder;

/// In-memory `Store`, guarded by a single mutex — concurrency correctness
/// is trivial here (no real parallelism inside one process), which is
/// exactly why this is a test double and not the production store: it
/// does not exercise the SQLite `IMMEDIATE`-transaction contract at all.
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    recorder: Option<AcquisitionRecorder>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            recorder: None,
        }
    }

    /// Attach a recorder used to assert P2/B3 ("no two workers hold the
    /// same lease concurrently") across a multi-worker test.
    pub fn with_recorder(recorder: AcquisitionRecorder) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            recorder: Some(recorder),
        }
    }

    /// Test helper: force a job's lease to look stale, for B1.
    pub fn backdate_lease(&self, id: &str, locked_at: DateTime<Utc>) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            job.locked_at = Some(locked_at);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_leasable(job: &Job, now: DateTime<Utc>, lease_ttl: chrono::Duration) -> bool {
    match job.state {
        JobState::Pending => true,
        JobState::Failed => job.next_retry_at.map(|t| t <= now).unwrap_or(false),
        JobState::Processing => job.locked_at.map(|t| t < now - lease_ttl).unwrap_or(false),
        JobState::Completed | JobState::Dead => false,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, new_job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&new_job.id) {
            return Err(StoreError::DuplicateId(new_job.id));
        }
        let job = Job {
            id: new_job.id.clone(),
            command: new_job.command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: new_job.max_retries,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
            locked_by: None,
            locked_at: None,
            last_error: None,
            output: None,
        };
        jobs.insert(new_job.id, job.clone());
        Ok(job)
    }

    async fn acquire_one(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        // Lease TTL is a test concern fixed at 5 minutes here; tests that
        // need a different TTL use `backdate_lease` directly instead of
        // relying on this constant.
        let lease_ttl = chrono::Duration::seconds(300);

        let mut jobs = self.jobs.lock().unwrap();
        let mut candidates: Vec<&String> = jobs
            .iter()
            .filter(|(_, job)| is_leasable(job, now, lease_ttl))
            .map(|(id, _)| id)
            .collect();
        candidates.sort_by(|a, b| {
            let ja = &jobs[*a];
            let jb = &jobs[*b];
            ja.created_at.cmp(&jb.created_at).then_with(|| a.cmp(b))
        });

        let chosen_id = candidates.first().map(|s| (*s).clone());
        match chosen_id {
            None => Ok(None),
            Some(id) => {
                let job = jobs.get_mut(&id).unwrap();
                job.state = JobState::Processing;
                job.locked_by = Some(worker_id.to_string());
                job.locked_at = Some(now);
                job.updated_at = now;
                let acquired = job.clone();
                if let Some(recorder) = &self.recorder {
                    recorder.record_acquire(&acquired.id, worker_id);
                }
                Ok(Some(acquired))
            }
        }
    }

    async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        output: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id).ok_or_else(|| StoreError::LeaseLost(id.to_string()))?;
        if job.state != JobState::Processing || job.locked_by.as_deref() != Some(worker_id) {
            return Err(StoreError::LeaseLost(id.to_string()));
        }
        job.state = JobState::Completed;
        job.locked_by = None;
        job.locked_at = None;
        job.output = output;
        job.updated_at = now;
        if let Some(recorder) = &self.recorder {
            recorder.record_release(id, worker_id);
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: Option<String>,
        output: Option<String>,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id).ok_or_else(|| StoreError::LeaseLost(id.to_string()))?;
        if job.state != JobState::Processing || job.locked_by.as_deref() != Some(worker_id) {
            return Err(StoreError::LeaseLost(id.to_string()));
        }
        job.attempts += 1;
        job.last_error = error;
        job.output = output;
        job.locked_by = None;
        job.locked_at = None;
        job.updated_at = now;
        match decision {
            Decision::Retry { delay } => {
                job.state = JobState::Failed;
                job.next_retry_at = Some(now + delay);
            }
            Decision::Dead => {
                job.state = JobState::Dead;
                job.next_retry_at = None;
            }
        }
        if let Some(recorder) = &self.recorder {
            recorder.record_release(id, worker_id);
        }
        Ok(())
    }

    async fn heartbeat(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id).ok_or_else(|| StoreError::LeaseLost(id.to_string()))?;
        if job.state != JobState::Processing || job.locked_by.as_deref() != Some(worker_id) {
            return Err(StoreError::LeaseLost(id.to_string()));
        }
        job.locked_at = Some(now);
        Ok(())
    }

    async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if job.state != JobState::Dead {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                actual: job.state.as_str(),
                expected: "dead",
            });
        }
        job.state = JobState::Pending;
        job.attempts = 0;
        job.next_retry_at = None;
        job.last_error = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| state.map(|s| s == job.state).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn counts(&self) -> Result<Counts, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = Counts::default();
        for job in jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }
}
