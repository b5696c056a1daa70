//! The `Store` trait: sole custodian of persistent job state (spec §4.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{Job, JobState, NewJob};
use crate::retry::Decision;

/// Per-state job counts, as returned by `status` (spec §4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead
    }
}

/// Sole custodian of persistent job state and of the state-machine
/// transitions (spec §4.1). All mutation is performed inside single
/// statement or serialized transactions so the invariants in spec §3 hold
/// under arbitrary crash points.
///
/// Implementations MUST make `acquire_one` atomic with respect to the
/// leasable predicate (spec §3 I6): the compound select + update has to
/// happen inside one serialized transaction, never as a read followed by
/// a separate write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a job in state `pending`, `attempts = 0`.
    ///
    /// Fails with [`StoreError::DuplicateId`] if `id` already exists.
    /// Never overwrites an existing row (spec I5, §9 "does a re-enqueued
    /// id ever replace an existing row?" — no).
    async fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Atomically select one leasable job (spec I6) and transition it to
    /// `processing`, tie-broken by oldest `created_at` then ascending
    /// `id`. Returns `None` if no job is currently leasable.
    async fn acquire_one(&self, worker_id: &str, now: DateTime<Utc>)
        -> Result<Option<Job>, StoreError>;

    /// Mark a job completed. Requires `state = processing` and
    /// `locked_by = worker_id`; otherwise returns [`StoreError::LeaseLost`].
    async fn complete(
        &self,
        id: &str,
        worker_id: &str,
        output: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt and apply a retry-policy decision.
    /// Requires `state = processing` and `locked_by = worker_id`;
    /// otherwise returns [`StoreError::LeaseLost`]. Always increments
    /// `attempts` first, then applies `decision`.
    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: Option<String>,
        output: Option<String>,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Refresh `locked_at` iff the lease is still held by `worker_id`.
    async fn heartbeat(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Reset a `dead` job back to `pending`, `attempts = 0`. Any other
    /// state yields [`StoreError::InvalidTransition`]; an unknown id
    /// yields [`StoreError::NotFound`].
    async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// List jobs, optionally filtered by state, oldest `created_at` first.
    async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>, StoreError>;

    /// Fetch a single job by id.
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Per-state counts across the whole table.
    async fn counts(&self) -> Result<Counts, StoreError>;
}
