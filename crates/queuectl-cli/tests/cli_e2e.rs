//! End-to-end coverage of the happy-path and DLQ scenarios from spec §8,
//! driving the real `queuectl` binary the way an operator's shell would.
//! Mirrors the `Command::new(env!("CARGO_BIN_EXE_..."))` style used by the
//! CLI integration tests elsewhere in this corpus.

use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

fn queuectl(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_queuectl"));
    cmd.env("QUEUECTL_HOME", home);
    cmd
}

fn run(home: &Path, args: &[&str]) -> std::process::Output {
    queuectl(home)
        .args(args)
        .output()
        .expect("failed to run queuectl")
}

fn spawn_single_worker(home: &Path) -> Child {
    queuectl(home)
        .args(["worker", "start", "--single"])
        .spawn()
        .expect("failed to spawn queuectl worker")
}

/// Polls `queuectl list --state <state>` until `id` shows up in it, or
/// panics after `timeout`.
fn wait_for_state(home: &Path, id: &str, state: &str, timeout: Duration) {
    let start = Instant::now();
    loop {
        let output = run(home, &["list", "--state", state]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains(id) {
            return;
        }
        if start.elapsed() > timeout {
            let all = run(home, &["list"]);
            panic!(
                "job {id:?} did not reach state {state:?} within {timeout:?}; full list:\n{}",
                String::from_utf8_lossy(&all.stdout)
            );
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(unix)]
fn stop_worker(mut child: Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    let _ = child.wait();
}

#[cfg(not(unix))]
fn stop_worker(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn happy_path_enqueue_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    let enqueue = run(home, &["enqueue", r#"{"id":"a","command":"echo hi"}"#]);
    assert!(enqueue.status.success(), "enqueue failed: {enqueue:?}");

    let worker = spawn_single_worker(home);
    wait_for_state(home, "a", "completed", Duration::from_secs(10));
    stop_worker(worker);
}

#[test]
fn duplicate_enqueue_is_rejected_with_exit_code_one() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    let first = run(home, &["enqueue", r#"{"id":"dup","command":"echo hi"}"#]);
    assert!(first.status.success());

    let second = run(home, &["enqueue", r#"{"id":"dup","command":"echo bye"}"#]);
    assert!(!second.status.success());
    assert_eq!(second.status.code(), Some(1));
}

#[test]
fn failing_job_reaches_dead_letter_queue() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    let set_retries = run(home, &["config", "set", "max-retries", "0"]);
    assert!(set_retries.status.success());
    let set_base = run(home, &["config", "set", "backoff-base", "1"]);
    assert!(set_base.status.success());

    let enqueue = run(home, &["enqueue", r#"{"id":"b","command":"exit 1"}"#]);
    assert!(enqueue.status.success());

    let worker = spawn_single_worker(home);
    wait_for_state(home, "b", "dead", Duration::from_secs(10));
    stop_worker(worker);

    let dlq = run(home, &["dlq", "list"]);
    assert!(String::from_utf8_lossy(&dlq.stdout).contains('b'));
}

#[test]
fn dlq_retry_resets_job_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    run(home, &["config", "set", "max-retries", "0"]);
    run(home, &["config", "set", "backoff-base", "1"]);
    run(home, &["enqueue", r#"{"id":"c","command":"exit 1"}"#]);

    let worker = spawn_single_worker(home);
    wait_for_state(home, "c", "dead", Duration::from_secs(10));
    stop_worker(worker);

    let retry = run(home, &["dlq", "retry", "c"]);
    assert!(retry.status.success());

    let pending = run(home, &["list", "--state", "pending"]);
    assert!(String::from_utf8_lossy(&pending.stdout).contains('c'));
}

#[test]
fn dlq_retry_of_unknown_id_exits_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    let retry = run(home, &["dlq", "retry", "does-not-exist"]);
    assert!(!retry.status.success());
    assert_eq!(retry.status.code(), Some(2));
}

#[test]
fn status_reports_counts_after_enqueue() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();

    run(home, &["enqueue", r#"{"id":"s1","command":"echo hi"}"#]);
    let status = run(home, &["status"]);
    assert!(status.status.success());
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("pending=1"));
    assert!(stdout.contains("oldest pending job age"));
}
