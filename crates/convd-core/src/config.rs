use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Credit ledger parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsConfig {
    /// Balance every account is reset to at each UTC midnight.
    pub daily_cap: i64,
    /// Upper bound on one consume/reset transaction, in seconds.
    pub tx_timeout_secs: u64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            daily_cap: 50,
            tx_timeout_secs: 10,
        }
    }
}

/// Debounce windows for the burst aggregator (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Window armed after the first file of a collection, in milliseconds.
    pub first_window_ms: u64,
    /// Window once a burst is under way (second file onwards), in milliseconds.
    pub burst_window_ms: u64,
    /// Window for platform-grouped albums once a burst is under way, in milliseconds.
    pub album_window_ms: u64,
    /// Fallback timeout for manual batches with a declared file count, in seconds.
    pub manual_timeout_secs: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            first_window_ms: 3500,
            burst_window_ms: 900,
            album_window_ms: 2000,
            manual_timeout_secs: 10,
        }
    }
}

/// Logging parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
    /// Append to `convd.log` in the XDG state dir; false logs to stderr only.
    pub to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_FILTER.to_string(),
            to_file: true,
        }
    }
}

/// Global configuration loaded from `~/.config/convd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvdConfig {
    /// Number of parallel scheduler workers.
    pub workers: usize,
    /// Capacity of each lane (priority / normal). None = max(2 * workers, 10).
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Hard limit for a single conversion, in seconds.
    pub conversion_timeout_secs: u64,
    /// Files at or above this size are treated as heavy jobs.
    pub heavy_size_bytes: u64,
    /// How long task records are kept before `purge` may delete them, in seconds.
    pub task_ttl_secs: u64,
    /// Optional credit ledger settings; if missing, built-in defaults are used.
    #[serde(default)]
    pub credits: Option<CreditsConfig>,
    /// Optional debounce settings; if missing, built-in defaults are used.
    #[serde(default)]
    pub burst: Option<BurstConfig>,
    /// Optional logging settings; if missing, built-in defaults are used.
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Default for ConvdConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: None,
            conversion_timeout_secs: 600,
            heavy_size_bytes: 50 * 1024 * 1024,
            task_ttl_secs: 24 * 60 * 60,
            credits: None,
            burst: None,
            logging: None,
        }
    }
}

impl ConvdConfig {
    /// Effective worker count (at least one).
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    /// Effective lane capacity.
    pub fn lane_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| (self.worker_count() * 2).max(10))
            .max(1)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn credits(&self) -> CreditsConfig {
        self.credits.clone().unwrap_or_default()
    }

    pub fn burst(&self) -> BurstConfig {
        self.burst.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("convd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ConvdConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ConvdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ConvdConfig = toml::from_str(&data)?;
    Ok(cfg)
}
