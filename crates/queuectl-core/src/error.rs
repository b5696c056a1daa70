//! Error taxonomy for the queue engine (see spec §7).

use thiserror::Error;

/// Errors returned by [`crate::store::Store`] operations.
///
/// `LeaseLost` and `StoreUnavailable` are not failures of the job itself —
/// callers are expected to handle them without ever double-completing or
/// double-failing a job (see spec §7).
#[derive(Debug, Error)]
pub enum StoreError {
    /// `insert` was called with an `id` that already exists.
    #[error("job id {0:?} already exists")]
    DuplicateId(String),

    /// `dlq_retry` (or another state-gated op) found the job in a state
    /// that does not permit the requested transition.
    #[error("job {id:?} is in state {actual}, expected {expected}")]
    InvalidTransition {
        id: String,
        actual: &'static str,
        expected: &'static str,
    },

    /// No job exists with the given id.
    #[error("no job with id {0:?}")]
    NotFound(String),

    /// `complete`/`fail`/`heartbeat` found the row not held by `worker_id`
    /// under `processing` — the lease expired and someone else (or no one)
    /// owns it now. Never fatal: the caller discards the result.
    #[error("lease on job {0:?} was lost")]
    LeaseLost(String),

    /// Transient backend failure (busy, I/O). The caller should back off
    /// and retry; no job state was mutated.
    #[error("store temporarily unavailable: {0}")]
    StoreUnavailable(String),
}

/// Errors surfaced by the admin operations (spec §4.6) before they ever
/// reach the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("job id must be a non-empty string")]
    EmptyId,
    #[error("job command must be a non-empty string")]
    EmptyCommand,
    #[error("malformed job submission: {0}")]
    Malformed(String),
}
