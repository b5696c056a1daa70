//! # queuectl-core
//!
//! The queue engine: a durable job store state machine, a worker pool
//! that executes jobs as child processes under timeout and signal
//! control, and a retry/backoff policy that ties them together.
//!
//! This crate is the CORE described by the queuectl specification. It is
//! deliberately backend-agnostic: [`Store`] is a trait, and the only
//! concrete implementation lives in the sibling `queuectl-sqlite` crate.
//! `queuectl-testing` provides an in-memory `Store` and a fake clock for
//! deterministic tests of retry timing and lease recovery.
//!
//! ## Module map
//!
//! - [`job`] — the `Job` record and its `JobState` enum.
//! - [`store`] — the `Store` trait: insert, lease acquisition, state
//!   transitions, queries.
//! - [`retry`] — the pure backoff/DLQ decision function.
//! - [`executor`] — runs one job as a bounded child process.
//! - [`worker`] — the lease-execute-report loop.
//! - [`supervisor`] — spawns worker processes and tracks their PIDs.
//! - [`admin`] — enqueue/list/status/DLQ operations over the store.
//! - [`clock`] / [`shutdown`] — injectable time and cancellation.
//! - [`config`] — the typed tunables read from the external config store.
//!
//! ## What this crate is not
//!
//! It does not parse CLI arguments, does not own the on-disk config JSON
//! format, and does not decide how to print anything — those live in
//! `queuectl-cli`, which is a thin shell around the operations here.

pub mod admin;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use admin::{AdminOps, StatusDetail};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{StoreError, ValidationError};
pub use executor::{FailureReason, Outcome};
pub use job::{Job, JobState, NewJob};
pub use retry::Decision;
pub use shutdown::ShutdownToken;
pub use store::{Counts, Store};
pub use worker::{Worker, WorkerConfig};
