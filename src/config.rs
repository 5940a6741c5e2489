use std::path::PathBuf;
use std::time::Duration;

/// Engine and host settings, read from `BAYLINE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Max wait for a per-resource lock before answering `Busy`.
    pub lock_timeout: Duration,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends between compactions.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2_000),
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lock_timeout = lookup("BAYLINE_LOCK_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);
        let data_dir = lookup("BAYLINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let metrics_port = lookup("BAYLINE_METRICS_PORT").and_then(|s| s.parse().ok());
        let compact_threshold = lookup("BAYLINE_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        Self {
            lock_timeout,
            data_dir,
            metrics_port,
            compact_threshold,
        }
    }
}
