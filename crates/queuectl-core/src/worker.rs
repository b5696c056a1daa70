//! Single-process job-processing loop (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::StoreError;
use crate::executor::{self, Outcome};
use crate::retry;
use crate::shutdown::ShutdownToken;
use crate::store::Store;

/// `worker_id = "{hostname}:{pid}"`, stable for the process's lifetime
/// (spec §4.4 "Identity").
pub fn worker_id(hostname: &str, pid: u32) -> String {
    format!("{hostname}:{pid}")
}

/// Grace window between a shutdown request and cancelling the in-flight
/// Executor call (spec §4.4, glossary "Grace window"). Independent of the
/// lease TTL and the job timeout (spec §5).
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub config: Config,
    pub grace_window: Duration,
}

impl WorkerConfig {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            grace_window: Duration::from_secs(30),
        }
    }
}

/// The long-running loop described in spec §4.4.
pub struct Worker {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    worker_id: String,
    config: WorkerConfig,
    shutdown: ShutdownToken,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        worker_id: String,
        config: WorkerConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            store,
            clock,
            worker_id,
            config,
            shutdown,
        }
    }

    /// Run until shutdown is requested. Never returns an `Err` for
    /// per-job failures — only a `Store` that is unavailable even for
    /// housekeeping is surfaced, and even then the loop just logs and
    /// keeps retrying (spec §7 "Store errors ... never corrupt job state
    /// because no partial write is acknowledged upstream").
    pub async fn run(&self) {
        info!(worker_id = %self.worker_id, "worker starting");

        loop {
            if self.shutdown.requested() {
                break;
            }

            let now = self.clock.now();
            match self.store.acquire_one(&self.worker_id, now).await {
                Ok(Some(job)) => {
                    self.run_one(job.id, job.attempts, job.command).await;
                }
                Ok(None) => {
                    self.shutdown
                        .wait_or_requested(Duration::from_secs(self.config.config.poll_interval_seconds))
                        .await;
                }
                Err(StoreError::StoreUnavailable(reason)) => {
                    warn!(worker_id = %self.worker_id, error = %reason, "store unavailable, backing off");
                    self.shutdown
                        .wait_or_requested(Duration::from_secs(self.config.config.poll_interval_seconds))
                        .await;
                }
                Err(err) => {
                    // acquire_one should never return the other StoreError
                    // variants; treat as transient rather than crash the
                    // worker (spec §7: Worker-loop errors log and back off,
                    // they never terminate the Worker).
                    warn!(worker_id = %self.worker_id, error = %err, "unexpected error acquiring job");
                    self.shutdown
                        .wait_or_requested(Duration::from_secs(self.config.config.poll_interval_seconds))
                        .await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    async fn run_one(&self, job_id: String, attempts_before: u32, command: String) {
        let span = tracing::info_span!("attempt", job_id = %job_id, worker_id = %self.worker_id, attempt = attempts_before + 1);
        let _enter = span.enter();

        let timeout = Duration::from_secs(self.config.config.job_timeout_seconds);
        let execution = executor::run(&command, timeout);

        // Refreshes the lease while the attempt is in flight so a job
        // running close to `lease-ttl-seconds` doesn't get reclaimed by
        // another worker as stale mid-attempt (spec §2 "heartbeats its
        // lease").
        let heartbeat_interval =
            Duration::from_secs(self.config.config.lease_ttl_seconds / 2).max(Duration::from_secs(1));
        let heartbeat_store = self.store.clone();
        let heartbeat_clock = self.clock.clone();
        let heartbeat_worker_id = self.worker_id.clone();
        let heartbeat_job_id = job_id.clone();
        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                let now = heartbeat_clock.now();
                if let Err(err) = heartbeat_store.heartbeat(&heartbeat_job_id, &heartbeat_worker_id, now).await {
                    debug!(job_id = %heartbeat_job_id, error = %err, "heartbeat failed");
                }
            }
        });

        let outcome = tokio::select! {
            outcome = execution => outcome,
            _ = self.shutdown.wait_or_requested(self.config.grace_window) => {
                heartbeat_task.abort();
                // Shutdown was requested and the grace window elapsed while
                // this attempt was still running. We do NOT mark the job
                // failed here: a forcibly-cancelled worker must look
                // identical to a crashed one so stale-lease recovery (spec
                // I6) picks it up uniformly, rather than the Worker
                // recording an attempt it never actually completed.
                info!(job_id = %job_id, "grace window elapsed, abandoning in-flight job to lease expiry");
                return;
            }
        };
        heartbeat_task.abort();

        match outcome {
            Outcome::Success { output } => {
                let now = self.clock.now();
                match self.store.complete(&job_id, &self.worker_id, Some(output), now).await {
                    Ok(()) => info!(job_id = %job_id, "job completed"),
                    Err(StoreError::LeaseLost(_)) => {
                        debug!(job_id = %job_id, "lease lost before completion could be recorded");
                    }
                    Err(err) => warn!(job_id = %job_id, error = %err, "failed to record completion"),
                }
            }
            Outcome::Failure { output, reason, exit_code } => {
                let attempts_after_failure = attempts_before + 1;
                // `max_retries` and `backoff_base` are read from the live
                // config at decision time, not the job's own stored
                // `max_retries` (spec §4.2, §9).
                let decision = retry::decide(
                    attempts_after_failure,
                    self.config.config.max_retries,
                    self.config.config.backoff_base,
                );
                warn!(
                    job_id = %job_id,
                    reason = reason.as_str(),
                    exit_code = exit_code,
                    attempts = attempts_after_failure,
                    decision = ?decision,
                    "job attempt failed"
                );
                let now = self.clock.now();
                let error_message = format!("{}: exit_code={:?}", reason.as_str(), exit_code);
                match self
                    .store
                    .fail(&job_id, &self.worker_id, Some(error_message), Some(output), decision, now)
                    .await
                {
                    Ok(()) => {}
                    Err(StoreError::LeaseLost(_)) => {
                        debug!(job_id = %job_id, "lease lost before failure could be recorded");
                    }
                    Err(err) => warn!(job_id = %job_id, error = %err, "failed to record failure"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_testing::{FakeClock, MemoryStore};
    use std::sync::Arc;

    fn config(max_retries: u32) -> WorkerConfig {
        let mut cfg = WorkerConfig::new(Config::default());
        cfg.config.max_retries = max_retries;
        cfg.config.poll_interval_seconds = 0;
        cfg
    }

    #[tokio::test]
    async fn happy_path_completes_job_in_one_attempt() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let now = clock.now();
        store
            .insert(
                crate::job::NewJob {
                    id: "a".into(),
                    command: "echo hi".into(),
                    max_retries: 3,
                },
                now,
            )
            .await
            .unwrap();

        let shutdown = ShutdownToken::new();
        let worker = Worker::new(store.clone(), clock, "w1".into(), config(3), shutdown.clone());

        let job = store.acquire_one("w1", now).await.unwrap().unwrap();
        worker.run_one(job.id.clone(), job.attempts, job.command).await;

        let after = store.get("a").await.unwrap().unwrap();
        assert_eq!(after.state, crate::job::JobState::Completed);
        assert_eq!(after.attempts, 0);
        assert!(after.output.unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn failure_schedules_retry_not_dlq_when_retries_remain() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let now = clock.now();
        store
            .insert(
                crate::job::NewJob {
                    id: "b".into(),
                    command: "exit 1".into(),
                    max_retries: 3,
                },
                now,
            )
            .await
            .unwrap();

        let shutdown = ShutdownToken::new();
        let worker = Worker::new(store.clone(), clock, "w1".into(), config(3), shutdown);

        let job = store.acquire_one("w1", now).await.unwrap().unwrap();
        worker.run_one(job.id.clone(), job.attempts, job.command).await;

        let after = store.get("b").await.unwrap().unwrap();
        assert_eq!(after.state, crate::job::JobState::Failed);
        assert_eq!(after.attempts, 1);
        assert!(after.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn retry_decision_uses_live_config_max_retries_not_the_jobs_own() {
        // Job stores max_retries=3, but the Worker's config says 0: config
        // wins, so the single failure must go straight to the DLQ (spec
        // §4.2, §9).
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let now = clock.now();
        store
            .insert(
                crate::job::NewJob {
                    id: "c".into(),
                    command: "exit 1".into(),
                    max_retries: 3,
                },
                now,
            )
            .await
            .unwrap();

        let shutdown = ShutdownToken::new();
        let worker = Worker::new(store.clone(), clock, "w1".into(), config(0), shutdown);

        let job = store.acquire_one("w1", now).await.unwrap().unwrap();
        assert_eq!(job.max_retries, 3);
        worker.run_one(job.id.clone(), job.attempts, job.command).await;

        let after = store.get("c").await.unwrap().unwrap();
        assert_eq!(after.state, crate::job::JobState::Dead);
    }
}
