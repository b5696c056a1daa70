//! Wall-clock source, injectable so tests never need a real `sleep`.

use chrono::{DateTime, Utc};

/// A source of "now", abstracted so the retry/lease timing tests in
/// `queuectl-testing` can move time forward without waiting on it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock, backed by [`chrono::Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
