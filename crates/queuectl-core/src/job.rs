//! The `Job` record and its state machine (spec §3, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum size kept for `output` before truncation (bytes). See spec §4.3.
pub const OUTPUT_CAP_BYTES: usize = 16 * 1024;

/// Maximum size kept for `last_error` before truncation (bytes).
pub const LAST_ERROR_CAP_BYTES: usize = 4 * 1024;

/// Truncation marker appended when output/errors are cut off.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// `jobs.state` (spec §3 table, §4.1 diagram).
///
/// `failed` is always transient: a job in this state either re-enters
/// `processing` once `next_retry_at` elapses, or is promoted to `dead`.
/// Terminal states are `completed` and `dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state {other:?}")),
        }
    }
}

/// The sole persistent entity (spec §3).
///
/// Invariants I1-I4 are enforced by [`crate::store::Store`] implementations,
/// never by this struct's constructors alone — the struct is a plain
/// record, the state machine lives in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub output: Option<String>,
}

/// Fields required to submit a new job (the `enqueue` argument, spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub max_retries: u32,
}

/// Truncate `s` to at most `cap` bytes at a UTF-8 char boundary, appending
/// [`TRUNCATION_MARKER`] when truncation happened.
pub fn truncate_bounded(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dead,
        ] {
            let parsed: JobState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn truncate_bounded_appends_marker_only_when_cut() {
        assert_eq!(truncate_bounded("short", 100), "short");
        let long = "a".repeat(20);
        let truncated = truncate_bounded(&long, 5);
        assert!(truncated.starts_with("aaaaa"));
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncate_bounded_respects_utf8_boundaries() {
        let s = "héllo world"; // 'é' is 2 bytes
        let truncated = truncate_bounded(s, 2);
        assert!(String::from_utf8(truncated.clone().into_bytes()).is_ok());
        assert!(truncated.starts_with('h'));
    }
}
