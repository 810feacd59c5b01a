//! Layered configuration: TOML file, environment overrides, in-code defaults.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};

/// Default config location checked when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/modscan/config.toml";

/// Well-known file paths shared by the daemon and the supervisor.
///
/// Lock and status files live in /tmp: advisory locks misbehave on NFS
/// home directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub lock_file: PathBuf,
    pub status_file: PathBuf,
    pub database: PathBuf,
    pub device_list: PathBuf,
    pub jsonl_log: PathBuf,
    pub supervisor_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/tmp/modscan.pid"),
            status_file: PathBuf::from("/tmp/modscan.status"),
            database: PathBuf::from("/var/lib/modscan/modscan.db"),
            device_list: PathBuf::from("/etc/modscan/devices.txt"),
            jsonl_log: PathBuf::from("/var/log/modscan/activity.jsonl"),
            supervisor_log: PathBuf::from("/var/log/modscan/supervisor.log"),
        }
    }
}

/// Poller loop and cycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollerConfig {
    /// Outer loop wake interval.
    pub check_interval_secs: u64,
    /// Per-device rescan interval (the only retry backoff for failed devices).
    pub device_scan_interval_secs: u64,
    /// Heartbeat sub-interval during sleeps.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat age at which the daemon self-reports unhealthy.
    /// Must stay below `supervisor.staleness_secs`.
    pub self_staleness_secs: u64,
    /// Fixed worker pool size, independent of fleet size.
    pub pool_size: usize,
    /// Hostname pattern selecting pollable devices from the directory.
    pub device_pattern: String,
    /// Dialects with verbose parse logging enabled ("ccap0", "ccap1", "ccap2").
    pub debug_dialects: Vec<String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            device_scan_interval_secs: 600,
            heartbeat_interval_secs: 10,
            self_staleness_secs: 45,
            pool_size: 10,
            device_pattern: r"CCAP[012]\d{2}".to_string(),
            debug_dialects: Vec::new(),
        }
    }
}

impl PollerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn device_scan_interval(&self) -> Duration {
        Duration::from_secs(self.device_scan_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn self_staleness(&self) -> Duration {
        Duration::from_secs(self.self_staleness_secs)
    }
}

/// Supervisor thresholds and restart budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Heartbeat age at which the supervisor declares the daemon dead.
    pub staleness_secs: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace_secs: u64,
    /// Wait after starting a daemon before re-checking liveness.
    pub settle_secs: u64,
    /// Delay between restart attempts (jittered).
    pub restart_delay_secs: u64,
    pub max_restart_attempts: u32,
    /// Command used to start the daemon. Empty means the current executable
    /// with the `daemon` subcommand.
    pub daemon_command: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 60,
            stop_grace_secs: 30,
            settle_secs: 10,
            restart_delay_secs: 30,
            max_restart_attempts: 3,
            daemon_command: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Retention caps for the modulation table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    pub auto_cleanup: bool,
    pub retention_days: u32,
    /// Detail window: rows older than this are pruned regardless of
    /// `retention_days` to keep the hot table small.
    pub detail_window_hours: u32,
    /// Row count above which the maintenance check reports degraded health.
    pub row_warn_threshold: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            auto_cleanup: true,
            retention_days: 8,
            detail_window_hours: 48,
            row_warn_threshold: 10_000_000,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub poller: PollerConfig,
    pub supervisor: SupervisorConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist; the default path is optional and falls
    /// back to in-code defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ScanError::MissingConfig {
                        path: p.to_path_buf(),
                    });
                }
                Self::from_file(p)?
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        Ok(toml::from_str(&raw)?)
    }

    /// Deployment knobs the original exposed through the environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(days) = std::env::var("MODSCAN_RETENTION_DAYS")
            && let Ok(parsed) = days.parse::<u32>()
        {
            self.retention.retention_days = parsed;
        }
        if let Ok(flag) = std::env::var("MODSCAN_AUTO_CLEANUP") {
            self.retention.auto_cleanup = flag.eq_ignore_ascii_case("true");
        }
        if let Ok(dialects) = std::env::var("MODSCAN_DEBUG_DIALECTS") {
            self.poller.debug_dialects = dialects
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }
    }

    /// Reject configurations that violate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.poller.pool_size == 0 {
            return Err(ScanError::InvalidConfig {
                details: "poller.pool_size must be at least 1".to_string(),
            });
        }
        if self.poller.heartbeat_interval_secs == 0 || self.poller.check_interval_secs == 0 {
            return Err(ScanError::InvalidConfig {
                details: "poller.check_interval_secs and poller.heartbeat_interval_secs must be at least 1".to_string(),
            });
        }
        if self.poller.self_staleness_secs >= self.supervisor.staleness_secs {
            return Err(ScanError::InvalidConfig {
                details: format!(
                    "poller.self_staleness_secs ({}) must be below supervisor.staleness_secs ({}) so the daemon self-reports unhealthy first",
                    self.poller.self_staleness_secs, self.supervisor.staleness_secs
                ),
            });
        }
        if self.poller.heartbeat_interval_secs >= self.supervisor.staleness_secs {
            return Err(ScanError::InvalidConfig {
                details: "heartbeat interval must stay well below the supervisor staleness threshold".to_string(),
            });
        }
        if self.paths.lock_file == self.paths.status_file {
            return Err(ScanError::InvalidConfig {
                details: "lock_file and status_file must be distinct paths".to_string(),
            });
        }
        regex::Regex::new(&self.poller.device_pattern).map_err(|e| ScanError::InvalidConfig {
            details: format!("poller.device_pattern is not a valid regex: {e}"),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poller.pool_size, 10);
        assert_eq!(config.poller.device_scan_interval_secs, 600);
    }

    #[test]
    fn self_staleness_must_undercut_supervisor_staleness() {
        let mut config = Config::default();
        config.poller.self_staleness_secs = 60;
        config.supervisor.staleness_secs = 60;
        assert!(matches!(
            config.validate(),
            Err(ScanError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn lock_and_status_paths_must_differ() {
        let mut config = Config::default();
        config.paths.status_file.clone_from(&config.paths.lock_file);
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_overrides() {
        let raw = r#"
            [poller]
            pool_size = 4
            device_scan_interval_secs = 120

            [supervisor]
            max_restart_attempts = 5
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.poller.pool_size, 4);
        assert_eq!(config.poller.device_scan_interval_secs, 120);
        assert_eq!(config.supervisor.max_restart_attempts, 5);
        // Unspecified sections keep their defaults.
        assert_eq!(config.retention.retention_days, 8);
    }

    #[test]
    fn invalid_device_pattern_is_rejected() {
        let mut config = Config::default();
        config.poller.device_pattern = "CCAP[".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/modscan.toml"))).unwrap_err();
        assert_eq!(err.code(), "MS-1002");
    }
}
