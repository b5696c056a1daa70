//! Owns `queuectl_config.json` (spec §6): reading, writing, and the
//! string-keyed `config get/set/list` surface over the typed [`Config`].

use std::path::Path;

use anyhow::{Context, Result};
use queuectl_core::Config;

/// Reads the config file, falling back to defaults if it does not exist
/// yet (first run).
pub fn load(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

/// `config get <key>`. Unknown keys are a validation error (exit 1).
pub fn get(config: &Config, key: &str) -> Result<String> {
    Ok(match key {
        "max-retries" => config.max_retries.to_string(),
        "backoff-base" => config.backoff_base.to_string(),
        "job-timeout-seconds" => config.job_timeout_seconds.to_string(),
        "lease-ttl-seconds" => config.lease_ttl_seconds.to_string(),
        "poll-interval-seconds" => config.poll_interval_seconds.to_string(),
        other => anyhow::bail!("unknown config key {other:?}, expected one of {:?}", Config::KEYS),
    })
}

/// `config set <key> <value>`. Fails on an unknown key or a value that
/// does not parse as the key's type.
pub fn set(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parsed: u64 = value
        .parse()
        .with_context(|| format!("value {value:?} for key {key:?} must be a non-negative integer"))?;
    match key {
        "max-retries" => config.max_retries = parsed as u32,
        "backoff-base" => config.backoff_base = parsed as u32,
        "job-timeout-seconds" => config.job_timeout_seconds = parsed,
        "lease-ttl-seconds" => config.lease_ttl_seconds = parsed,
        "poll-interval-seconds" => config.poll_interval_seconds = parsed,
        other => anyhow::bail!("unknown config key {other:?}, expected one of {:?}", Config::KEYS),
    }
    Ok(())
}

/// `config list`: every key paired with its current value.
pub fn list(config: &Config) -> Vec<(&'static str, String)> {
    Config::KEYS
        .iter()
        .map(|key| (*key, get(config, key).expect("KEYS is exhaustive over get's match")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl_config.json");

        let mut config = load(&path).unwrap();
        assert_eq!(config, Config::default());

        set(&mut config, "max-retries", "7").unwrap();
        save(&path, &config).unwrap();

        let reloaded = load(&path).unwrap();
        assert_eq!(reloaded.max_retries, 7);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut config = Config::default();
        assert!(set(&mut config, "not-a-real-key", "1").is_err());
    }

    #[test]
    fn set_rejects_non_integer_value() {
        let mut config = Config::default();
        assert!(set(&mut config, "max-retries", "three").is_err());
    }

    #[test]
    fn list_covers_every_key() {
        let config = Config::default();
        let entries = list(&config);
        assert_eq!(entries.len(), Config::KEYS.len());
    }
}
