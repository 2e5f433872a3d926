//! Daemon configuration (§3.6, §4.10): loaded from `$DATA_DIR/devnetd.toml`
//! and overlaid with `DEVNETD_`-prefixed environment variables. Failure to
//! load or validate is fatal at startup — the daemon never starts with a
//! configuration it cannot validate, mirroring the teacher's provider-style
//! config diagnostics that name both the env var and the config key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use displaydoc::Display;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// failed to read {path}: {source}
    Read { path: PathBuf, #[source] source: std::io::Error },
    /// failed to parse {path} as TOML: {source}
    Parse { path: PathBuf, #[source] source: toml::de::Error },
    /// invalid value for env var {env_var} (config key `{key}`): {message}
    InvalidEnvOverride { env_var: String, key: String, message: String },
    /// {key} is invalid: {message}
    Invalid { key: String, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_socket: PathBuf,
    pub bind_tcp: Option<String>,
    pub api_keys_path: PathBuf,
    pub plugins_dir: PathBuf,
    pub workers: usize,
    #[serde(with = "humantime_seconds")]
    pub health_interval: Duration,
    #[serde(with = "humantime_seconds")]
    pub health_probe_timeout: Duration,
    pub health_failure_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("/var/lib/devnetd");
        Self {
            bind_socket: data_dir.join("devnetd.sock"),
            api_keys_path: data_dir.join("api-keys.yaml"),
            plugins_dir: data_dir.join("plugins"),
            data_dir,
            bind_tcp: None,
            workers: 2,
            health_interval: Duration::from_secs(5),
            health_probe_timeout: Duration::from_secs(5),
            health_failure_threshold: 3,
        }
    }
}

impl Config {
    /// Reads `$data_dir/devnetd.toml` (if present), applies `DEVNETD_*` env
    /// var overrides, then validates.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join("devnetd.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<Config>(&raw).map_err(|source| ConfigError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.data_dir = data_dir.to_path_buf();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var("DEVNETD_BIND_TCP") {
            self.bind_tcp = Some(raw);
        }
        if let Ok(raw) = std::env::var("DEVNETD_WORKERS") {
            self.workers = raw.parse().map_err(|e| ConfigError::InvalidEnvOverride {
                env_var: "DEVNETD_WORKERS".to_string(),
                key: "workers".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Ok(raw) = std::env::var("DEVNETD_HEALTH_INTERVAL_SECS") {
            let secs: u64 = raw.parse().map_err(|e| ConfigError::InvalidEnvOverride {
                env_var: "DEVNETD_HEALTH_INTERVAL_SECS".to_string(),
                key: "health_interval".to_string(),
                message: format!("{e}"),
            })?;
            self.health_interval = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("DEVNETD_HEALTH_FAILURE_THRESHOLD") {
            self.health_failure_threshold = raw.parse().map_err(|e| ConfigError::InvalidEnvOverride {
                env_var: "DEVNETD_HEALTH_FAILURE_THRESHOLD".to_string(),
                key: "health_failure_threshold".to_string(),
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 1 {
            return Err(ConfigError::Invalid { key: "workers".to_string(), message: "must be >= 1".to_string() });
        }
        if self.health_failure_threshold < 1 {
            return Err(ConfigError::Invalid {
                key: "health_failure_threshold".to_string(),
                message: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

mod humantime_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = Config::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("devnetd.toml"), "workers = 4\nhealth_failure_threshold = 5\n").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.health_failure_threshold, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("devnetd.toml"), "workers = 4\n").unwrap();
        temp_env::with_var("DEVNETD_WORKERS", Some("9"), || {
            let config = Config::load(dir.path()).unwrap();
            assert_eq!(config.workers, 9);
        });
    }
}
