//! Tunables read from the external configuration store (spec §6, §9).
//!
//! This struct is a read-through value object: it is constructed fresh at
//! the point of use (worker startup, or per retry decision) rather than
//! held behind a shared mutable global (spec §9 "Replacing dynamic
//! patterns"). The on-disk JSON it is parsed from lives entirely in
//! `queuectl-cli`; this crate only knows the typed, validated values.

use serde::{Deserialize, Serialize};

/// §6 "Configuration keys", with their documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_retries: u32,
    pub backoff_base: u32,
    pub job_timeout_seconds: u64,
    pub lease_ttl_seconds: u64,
    pub poll_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            job_timeout_seconds: 300,
            lease_ttl_seconds: 300,
            poll_interval_seconds: 1,
        }
    }
}

impl Config {
    /// The full set of recognized keys, for `config list`/`config get`.
    pub const KEYS: [&'static str; 5] = [
        "max-retries",
        "backoff-base",
        "job-timeout-seconds",
        "lease-ttl-seconds",
        "poll-interval-seconds",
    ];

    /// spec §5: "Lease TTL must be >= job timeout; otherwise a healthy
    /// long-running job could be double-leased." Checked at worker/
    /// supervisor startup, not enforced by the type itself (both values
    /// can be set independently through `config set`).
    pub fn lease_ttl_covers_job_timeout(&self) -> bool {
        self.lease_ttl_seconds >= self.job_timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.job_timeout_seconds, 300);
        assert_eq!(config.lease_ttl_seconds, 300);
        assert_eq!(config.poll_interval_seconds, 1);
    }

    #[test]
    fn lease_ttl_check_flags_unsafe_combination() {
        let mut config = Config::default();
        config.lease_ttl_seconds = 10;
        config.job_timeout_seconds = 300;
        assert!(!config.lease_ttl_covers_job_timeout());
    }
}
