use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DATA_DIR_ENV: &str = "HISTORY_REAPPLY_DATA_DIR";
pub const LOG_FILTER_ENV: &str = "HISTORY_REAPPLY_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_snapshot_interval() -> u64 {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Root directory; each run gets `<data_dir>/<run_id>/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Snapshot every N persisted events. 0 disables periodic snapshots.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval: default_snapshot_interval(),
            log_filter: default_log_filter(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl RuntimeConfig {
    /// Read a JSON config file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(filter) = lookup(LOG_FILTER_ENV) {
            self.log_filter = filter;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".to_string()));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("log_filter must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"snapshot_interval": 0}"#).unwrap();
        assert_eq!(config.snapshot_interval, 0);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<RuntimeConfig, _> = serde_json::from_str(r#"{"snapshot_every": 5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut config = RuntimeConfig::default();
        config.apply_env_overrides(|key| match key {
            DATA_DIR_ENV => Some("/var/lib/reapply".to_string()),
            LOG_FILTER_ENV => Some("history_reapply=debug".to_string()),
            _ => None,
        });
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/reapply"));
        assert_eq!(config.log_filter, "history_reapply=debug");
    }

    #[test]
    fn empty_data_dir_is_invalid() {
        let config = RuntimeConfig {
            data_dir: PathBuf::new(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"data_dir": "runs", "metrics_enabled": false}"#).unwrap();
        let config = RuntimeConfig::load(&path).unwrap();
        assert!(!config.metrics_enabled);
        assert_eq!(config.run_dir("r1"), config.data_dir.join("r1"));
    }
}
