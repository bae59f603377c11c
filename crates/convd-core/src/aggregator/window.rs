//! Debounce windows.

use std::time::Duration;

use super::CollectionKey;
use crate::config::BurstConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstWindows {
    /// After the first file of a collection.
    pub first: Duration,
    /// Once a burst is under way.
    pub burst: Duration,
    /// Once an album burst is under way.
    pub album: Duration,
    /// Manual batches, restarted on every file.
    pub manual: Duration,
}

impl BurstWindows {
    pub fn from_config(cfg: &BurstConfig) -> Self {
        Self {
            first: Duration::from_millis(cfg.first_window_ms),
            burst: Duration::from_millis(cfg.burst_window_ms),
            album: Duration::from_millis(cfg.album_window_ms),
            manual: Duration::from_secs(cfg.manual_timeout_secs),
        }
    }

    /// Window to arm after a collection reached `count` files.
    pub fn for_count(&self, key: &CollectionKey, count: usize) -> Duration {
        if key.is_manual() {
            self.manual
        } else if count <= 1 {
            self.first
        } else if key.is_album() {
            self.album
        } else {
            self.burst
        }
    }
}

impl Default for BurstWindows {
    fn default() -> Self {
        Self::from_config(&BurstConfig::default())
    }
}
