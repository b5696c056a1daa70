//! Plain-text rendering for the CLI surface (spec §6). Kept separate from
//! `main.rs` so the formatting can be unit tested without clap in the
//! loop.

use queuectl_core::{Counts, Job, StatusDetail};

pub fn job_row(job: &Job) -> String {
    format!(
        "{:<20} {:<12} attempts={:<3} retries={:<3} created={}",
        job.id,
        job.state.as_str(),
        job.attempts,
        job.max_retries,
        job.created_at.to_rfc3339(),
    )
}

pub fn job_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "(no jobs)".to_string();
    }
    jobs.iter().map(job_row).collect::<Vec<_>>().join("\n")
}

pub fn status_block(counts: &Counts, worker_pids: &[u32]) -> String {
    format!(
        "pending={} processing={} completed={} failed={} dead={} total={}\nworkers: {}",
        counts.pending,
        counts.processing,
        counts.completed,
        counts.failed,
        counts.dead,
        counts.total(),
        if worker_pids.is_empty() {
            "(none running)".to_string()
        } else {
            worker_pids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
        },
    )
}

/// `status()`, enriched per `SPEC_FULL.md` §C so an operator can tell
/// "nothing pending" apart from "everything is backing off".
pub fn status_detail_block(detail: &StatusDetail, worker_pids: &[u32]) -> String {
    let oldest_pending = match detail.oldest_pending_age_seconds {
        Some(age) => format!("{age}s"),
        None => "(none)".to_string(),
    };
    format!(
        "{}\noldest pending job age: {}\nfailed jobs awaiting backoff: {}",
        status_block(&detail.counts, worker_pids),
        oldest_pending,
        detail.failed_not_yet_due,
    )
}
