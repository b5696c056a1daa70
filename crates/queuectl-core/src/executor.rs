//! Runs a single job's command as a bounded child process (spec §4.3).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::job::{truncate_bounded, OUTPUT_CAP_BYTES};

/// Default wall-clock timeout for a single attempt (spec §6 `job-timeout-seconds`).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period between sending a terminate signal and forcibly killing
/// a timed-out child (spec §4.3).
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Why a job attempt did not succeed (spec §4.3 `Failure` variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Child exited with a non-zero status.
    Exit,
    /// Wall-clock timeout elapsed; the child was killed.
    Timeout,
    /// The child process could not be spawned at all.
    Spawn,
    /// The child was terminated by a signal.
    Signal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Exit => "exit",
            FailureReason::Timeout => "timeout",
            FailureReason::Spawn => "spawn",
            FailureReason::Signal => "signal",
        }
    }
}

/// The normalized result of running one job attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        output: String,
    },
    Failure {
        exit_code: Option<i32>,
        output: String,
        reason: FailureReason,
    },
}

/// Runs a single job's `command` through the system shell (documented
/// injection surface, spec §4.3 — command sandboxing is out of scope) and
/// returns a normalized [`Outcome`].
///
/// Never leaks the child process: on every exit path (success, failure,
/// timeout, or cancellation via `tokio::select!`/drop) the child is either
/// reaped normally or explicitly killed before this function returns.
pub async fn run(command: &str, timeout_duration: Duration) -> Outcome {
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return Outcome::Failure {
                exit_code: None,
                output: err.to_string(),
                reason: FailureReason::Spawn,
            }
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Pipes must be drained concurrently with `wait()`, not after it: a
    // child that writes more than the OS pipe buffer blocks on write()
    // until someone reads, so waiting first deadlocks against the child
    // rather than racing the timeout.
    let wait_and_capture = async {
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let read_stdout = async {
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut out_buf).await;
            }
        };
        let read_stderr = async {
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut err_buf).await;
            }
        };
        let (status, _, _) = tokio::join!(child.wait(), read_stdout, read_stderr);
        out_buf.extend_from_slice(&err_buf);
        (status, out_buf)
    };

    match timeout(timeout_duration, wait_and_capture).await {
        Ok((status_result, raw_output)) => {
            let output = bounded_output(&raw_output);
            match status_result {
                Ok(status) if status.success() => Outcome::Success { output },
                Ok(status) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        if let Some(signal) = status.signal() {
                            return Outcome::Failure {
                                exit_code: None,
                                output: format!("{output}\nterminated by signal {signal}"),
                                reason: FailureReason::Signal,
                            };
                        }
                    }
                    Outcome::Failure {
                        exit_code: status.code(),
                        output,
                        reason: FailureReason::Exit,
                    }
                }
                Err(err) => Outcome::Failure {
                    exit_code: None,
                    output: format!("{output}\nwait() failed: {err}"),
                    reason: FailureReason::Spawn,
                },
            }
        }
        Err(_elapsed) => {
            // Timed out: ask nicely, wait a grace period, then force-kill.
            #[cfg(unix)]
            terminate_politely(&child);
            let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
            let _ = child.kill().await;
            let _ = child.wait().await;

            Outcome::Failure {
                exit_code: None,
                output: format!("command exceeded {}s timeout", timeout_duration.as_secs()),
                reason: FailureReason::Timeout,
            }
        }
    }
}

#[cfg(unix)]
fn terminate_politely(child: &tokio::process::Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

fn bounded_output(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    truncate_bounded(&text, OUTPUT_CAP_BYTES)
}
