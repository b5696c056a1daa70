//! Spawns and tracks worker processes (spec §4.5).
//!
//! The Supervisor only owns its own PID-registry bookkeeping: it writes
//! one PID per line on startup and removes the file on clean exit. Reading
//! the registry to send a stop signal is the external `worker stop`
//! admin path's job (spec §1, §4.5), not this module's.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Writes `pids` (one per line) to `path`, truncating any existing file.
pub fn write_registry(path: &Path, pids: &[u32]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for pid in pids {
        writeln!(file, "{pid}")?;
    }
    Ok(())
}

/// Removes the registry file if present. Missing file is not an error —
/// a Supervisor that never got as far as writing one, or whose file was
/// already cleaned up, should still exit cleanly.
pub fn remove_registry(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove PID registry"),
    }
}

/// Parses a registry file into the PIDs it lists, skipping blank lines.
/// Used by the CLI's `worker stop` path and by tests.
pub fn read_registry(path: &Path) -> std::io::Result<Vec<u32>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(contents
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect())
}

/// One child worker process tracked by the Supervisor.
pub struct SupervisedChild {
    pub pid: u32,
    pub child: std::process::Child,
}

/// Spawns `count` copies of `exe` with `worker_args`, records their PIDs to
/// `registry_path`, and returns the handles. On any spawn failure, already
///-spawned children are killed and the registry is not left half-written
/// (spec §7: "Supervisor-level errors (cannot spawn) terminate with a
/// non-zero exit code" — the caller is expected to propagate this `Err`).
pub fn spawn_workers(
    exe: &Path,
    worker_args: &[String],
    count: u32,
    registry_path: &Path,
) -> std::io::Result<Vec<SupervisedChild>> {
    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match std::process::Command::new(exe).args(worker_args).spawn() {
            Ok(child) => {
                let pid = child.id();
                info!(pid, "spawned worker process");
                children.push(SupervisedChild { pid, child });
            }
            Err(err) => {
                for mut spawned in children {
                    let _ = spawned.child.kill();
                }
                return Err(err);
            }
        }
    }

    let pids: Vec<u32> = children.iter().map(|c| c.pid).collect();
    write_registry(registry_path, &pids)?;
    Ok(children)
}

/// Default registry path relative to a data directory (spec §6).
pub fn default_registry_path(data_dir: &Path) -> PathBuf {
    data_dir.join("queuectl_workers.pid")
}

/// Waits for every supervised child to exit. `std::process::Child::wait`
/// blocks the calling thread, so each wait runs on the blocking thread
/// pool; this future resolves once all of them have (spec §4.5 "waits").
pub async fn wait_for_all(children: Vec<SupervisedChild>) {
    let waits: Vec<_> = children
        .into_iter()
        .map(|mut supervised| {
            tokio::task::spawn_blocking(move || {
                let _ = supervised.child.wait();
            })
        })
        .collect();
    for wait in waits {
        let _ = wait.await;
    }
}

/// Sends SIGTERM to `pid`. An already-exited PID is not an error (spec §6
/// "Exit 0 even if some PIDs are already gone").
#[cfg(unix)]
pub fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

/// Sends SIGKILL to `pid`, used once the Supervisor's grace window has
/// elapsed and a child is still running (spec §4.5).
#[cfg(unix)]
pub fn force_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) {}

#[cfg(not(unix))]
pub fn force_kill(_pid: u32) {}
