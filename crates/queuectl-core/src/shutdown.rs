//! A polled cancellation token, replacing the "signal handler sets a
//! global flag" pattern with an explicit object (spec §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Shared between the signal-handling task and the [`crate::worker::Worker`]
/// loop. `requested()` is the polling point; `notify` lets the poll sleep
/// (spec §3 suspension point (b)) be interrupted instead of run to
/// completion.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag and wake anyone parked in [`Self::wait_or_requested`].
    /// Sticky: once requested, stays requested (spec §4.4).
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, or return early if shutdown is requested
    /// meanwhile. Used for the Worker's poll-interval sleep so shutdown is
    /// observed promptly rather than after the full interval elapses.
    pub async fn wait_or_requested(&self, duration: std::time::Duration) {
        if self.requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }

    /// Block until shutdown is requested, with no timeout. Used by the
    /// Supervisor, which has nothing else to poll for while its children
    /// run (spec §4.5).
    pub async fn wait_requested(&self) {
        loop {
            if self.requested() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Installs handlers for the conventional "please stop" (SIGTERM) and
/// "interrupt" (SIGINT / Ctrl+C) signals, both flipping the same token
/// (spec §4.4).
#[cfg(unix)]
pub async fn install_signal_handlers(token: ShutdownToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    tracing::info!("shutdown signal received");
    token.request();
}
