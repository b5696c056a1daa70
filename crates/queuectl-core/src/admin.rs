//! Thin wrappers over the Store (spec §4.6). No business logic lives
//! here beyond input validation — every operation is a direct pass
//! through to a single [`Store`] call.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{StoreError, ValidationError};
use crate::job::{Job, JobState, NewJob};
use crate::store::{Counts, Store};

/// Default `list` page size when the caller does not specify one (spec §4.6).
pub const DEFAULT_LIST_LIMIT: u32 = 100;

pub struct AdminOps {
    store: Arc<dyn Store>,
}

impl AdminOps {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `enqueue(job_json)`: validate `id`/`command` are non-empty, then
    /// insert. Duplicate ids are rejected, never upserted (spec §9).
    pub async fn enqueue(
        &self,
        id: String,
        command: String,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Job, EnqueueError> {
        if id.trim().is_empty() {
            return Err(EnqueueError::Validation(ValidationError::EmptyId));
        }
        if command.trim().is_empty() {
            return Err(EnqueueError::Validation(ValidationError::EmptyCommand));
        }
        let job = self
            .store
            .insert(NewJob { id, command, max_retries }, now)
            .await?;
        Ok(job)
    }

    /// `status()`: per-state counts. The PID-registry contents are layered
    /// on top by `queuectl-cli`, which owns that file.
    pub async fn counts(&self) -> Result<Counts, StoreError> {
        self.store.counts().await
    }

    /// `status()`, enriched with the two signals an operator needs to tell
    /// "nothing pending" apart from "everything is backing off": the age
    /// of the oldest still-pending job, and how many `failed` jobs are not
    /// yet due for their retry lease.
    pub async fn status_detail(&self, now: DateTime<Utc>) -> Result<StatusDetail, StoreError> {
        let counts = self.store.counts().await?;

        let oldest_pending = self.store.list(Some(JobState::Pending), 1).await?;
        let oldest_pending_age_seconds = oldest_pending
            .first()
            .map(|job| (now - job.created_at).num_seconds().max(0));

        let failed = self.store.list(Some(JobState::Failed), u32::MAX).await?;
        let failed_not_yet_due = failed
            .iter()
            .filter(|job| job.next_retry_at.map(|t| t > now).unwrap_or(false))
            .count() as u64;

        Ok(StatusDetail {
            counts,
            oldest_pending_age_seconds,
            failed_not_yet_due,
        })
    }

    /// `list([state])`.
    pub async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<Job>, StoreError> {
        self.store.list(state, limit).await
    }

    /// `dlq list` == `list(state = dead)`.
    pub async fn dlq_list(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        self.store.list(Some(JobState::Dead), limit).await
    }

    /// `dlq retry <id>`.
    pub async fn dlq_retry(&self, id: &str, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.store.dlq_retry(id, now).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        self.store.get(id).await
    }
}

/// `status()`'s extended view (spec §6, supplemented per `SPEC_FULL.md` §C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDetail {
    pub counts: Counts,
    pub oldest_pending_age_seconds: Option<i64>,
    pub failed_not_yet_due: u64,
}

/// `enqueue` can fail either at validation (before the Store is touched)
/// or at the Store boundary (duplicate id).
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::{FakeClock, MemoryStore};

    fn ops() -> (AdminOps, FakeClock) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (AdminOps::new(store), FakeClock::new())
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_id() {
        let (ops, clock) = ops();
        let err = ops
            .enqueue(String::new(), "echo hi".into(), 3, clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Validation(ValidationError::EmptyId)));
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_command() {
        let (ops, clock) = ops();
        let err = ops
            .enqueue("a".into(), "   ".into(), 3, clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Validation(ValidationError::EmptyCommand)));
    }

    #[tokio::test]
    async fn enqueue_rejects_duplicate_id() {
        let (ops, clock) = ops();
        ops.enqueue("a".into(), "echo hi".into(), 3, clock.now()).await.unwrap();
        let err = ops
            .enqueue("a".into(), "echo bye".into(), 3, clock.now())
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Store(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn dlq_retry_on_non_dead_job_is_invalid_transition() {
        let (ops, clock) = ops();
        ops.enqueue("a".into(), "echo hi".into(), 3, clock.now()).await.unwrap();
        let err = ops.dlq_retry("a", clock.now()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn dlq_retry_on_unknown_id_is_not_found() {
        let (ops, clock) = ops();
        let err = ops.dlq_retry("missing", clock.now()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_detail_reports_oldest_pending_age_and_not_yet_due_failures() {
        let (ops, clock) = ops();
        let t0 = clock.now();
        ops.enqueue("a".into(), "echo hi".into(), 3, t0).await.unwrap();

        let later = t0 + chrono::Duration::seconds(30);
        let detail = ops.status_detail(later).await.unwrap();
        assert_eq!(detail.counts.pending, 1);
        assert_eq!(detail.oldest_pending_age_seconds, Some(30));
        assert_eq!(detail.failed_not_yet_due, 0);
    }

    #[tokio::test]
    async fn status_detail_counts_failed_jobs_not_yet_due() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock = FakeClock::new();
        let now = clock.now();
        store
            .insert(NewJob { id: "a".into(), command: "exit 1".into(), max_retries: 3 }, now)
            .await
            .unwrap();
        store.acquire_one("w1", now).await.unwrap();
        store
            .fail(
                "a",
                "w1",
                Some("boom".into()),
                None,
                crate::retry::Decision::Retry { delay: chrono::Duration::seconds(60) },
                now,
            )
            .await
            .unwrap();

        let ops = AdminOps::new(store);
        let detail = ops.status_detail(now).await.unwrap();
        assert_eq!(detail.failed_not_yet_due, 1);

        let after_backoff = now + chrono::Duration::seconds(61);
        let detail = ops.status_detail(after_backoff).await.unwrap();
        assert_eq!(detail.failed_not_yet_due, 0);
    }
}
