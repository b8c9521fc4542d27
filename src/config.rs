use std::path::PathBuf;
use std::time::Duration;

const WAL_FILE_NAME: &str = "fleetbook.wal";

/// Engine settings, read from `FLEETBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Compact once this many records were appended since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            data_dir: lookup("FLEETBOOK_DATA_DIR")
                .filter(|s| !s.is_empty())
                .map_or(defaults.data_dir, PathBuf::from),
            compact_threshold: parsed("FLEETBOOK_COMPACT_THRESHOLD")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.compact_threshold),
            compact_interval: parsed("FLEETBOOK_COMPACT_INTERVAL_SECS")
                .filter(|&n| n > 0)
                .map_or(defaults.compact_interval, Duration::from_secs),
            metrics_port: lookup("FLEETBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
