//! `tracing` setup for convd.
//!
//! Events go to `$XDG_STATE_HOME/convd/convd.log` or to stderr, filtered by
//! `RUST_LOG` when set, else by the `[logging]` filter from config.toml.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const DEFAULT_FILTER: &str = "info,convd=debug,convd_core=debug";

/// Where the log file lives (directory created on demand).
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("convd")?;
    let dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&dir).with_context(|| format!("create log dir {}", dir.display()))?;
    Ok(dir.join("convd.log"))
}

/// Install the global subscriber as configured.
///
/// Fails when the log file cannot be opened; the caller may then fall back to
/// [`init_logging_stderr`]. Nothing is installed on failure.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    if !cfg.to_file {
        init_logging_stderr(cfg);
        return Ok(());
    }

    let path = log_file_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(cfg))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    tracing::info!(path = %path.display(), "logging to file");
    Ok(())
}

pub fn init_logging_stderr(cfg: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(cfg))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn filter(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.filter))
        .unwrap_or_else(|e| {
            eprintln!("convd: bad log filter {:?} ({e}); using default", cfg.filter);
            EnvFilter::new(DEFAULT_FILTER)
        })
}
