//! Resolves the data directory holding the three files named in spec §6:
//! `queuectl.db`, `queuectl_config.json`, `queuectl_workers.pid`.

use std::path::PathBuf;

/// `QUEUECTL_HOME` overrides the default `~/.queuectl`, mirroring the
/// convention other local-first CLIs in this corpus use for their state
/// directory.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("QUEUECTL_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs_home()?;
    Ok(home.join(".queuectl"))
}

fn dirs_home() -> anyhow::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("HOME is not set and QUEUECTL_HOME was not provided"))
}

pub fn db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("queuectl.db")
}

pub fn config_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("queuectl_config.json")
}

pub fn registry_path(data_dir: &std::path::Path) -> PathBuf {
    queuectl_core::supervisor::default_registry_path(data_dir)
}
