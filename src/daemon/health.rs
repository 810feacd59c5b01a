//! Liveness reporting: a versioned snapshot any external process can read
//! without coordination.
//!
//! Every update serializes the full snapshot to a temporary path and renames
//! it over the canonical path, so a concurrent reader can never observe a
//! partial write. The file is left in place after daemon exit so the
//! supervisor can diagnose the last known state.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};
use crate::scan::cycle::CycleStatistics;

/// Daemon lifecycle states as written into the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Starting,
    Idle,
    Scanning,
    Finishing,
    Success,
    Error,
    Sleeping,
    ShuttingDown,
    Stopped,
}

impl DaemonStatus {
    /// Snapshot spelling. Kept as a plain string in the file so readers
    /// stay forward-compatible with states they do not know.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Finishing => "finishing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Sleeping => "sleeping",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomically-replaced liveness record. Every field is tolerated as
/// absent on read; old readers keep working as fields are added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub message: String,
    pub pid: Option<i32>,
    /// Unix epoch seconds; the supervisor's staleness math runs on this.
    pub last_heartbeat: Option<f64>,
    pub last_successful_scan: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub uptime_human: String,
    pub lock_file: Option<PathBuf>,
    pub is_healthy: bool,
    pub statistics: CycleStatistics,
}

impl HealthSnapshot {
    /// Read and parse the snapshot file whole.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Heartbeat age relative to `now` (epoch seconds). `None` when the
    /// snapshot never carried a heartbeat.
    #[must_use]
    pub fn heartbeat_age(&self, now_epoch: f64) -> Option<f64> {
        self.last_heartbeat.map(|beat| now_epoch - beat)
    }
}

/// Seconds since the Unix epoch, as the snapshot records heartbeats.
#[must_use]
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Writes liveness snapshots for one daemon process.
pub struct HealthReporter {
    path: PathBuf,
    lock_file: PathBuf,
    self_staleness: Duration,
    started_at: DateTime<Utc>,
    last_heartbeat: f64,
    last_successful_scan: Option<DateTime<Utc>>,
}

impl HealthReporter {
    #[must_use]
    pub fn new(path: PathBuf, lock_file: PathBuf, self_staleness: Duration) -> Self {
        Self {
            path,
            lock_file,
            self_staleness,
            started_at: Utc::now(),
            last_heartbeat: epoch_now(),
            last_successful_scan: None,
        }
    }

    /// Snapshot path, for consumers that re-read their own writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the completion time of a successful cycle.
    pub fn mark_success(&mut self) {
        self.last_successful_scan = Some(Utc::now());
    }

    /// Write a fresh snapshot. Side effect only: I/O errors are logged and
    /// swallowed so liveness reporting can never fail the daemon loop.
    pub fn update(&mut self, status: DaemonStatus, message: &str, statistics: &CycleStatistics) {
        let now = epoch_now();
        // Monotonic: a backwards clock step must not regress the heartbeat.
        self.last_heartbeat = self.last_heartbeat.max(now);

        let uptime = (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        #[allow(clippy::cast_possible_wrap)]
        let pid = std::process::id() as i32;
        let snapshot = HealthSnapshot {
            timestamp: Some(Utc::now()),
            status: Some(status.as_str().to_string()),
            message: message.to_string(),
            pid: Some(pid),
            last_heartbeat: Some(self.last_heartbeat),
            last_successful_scan: self.last_successful_scan,
            started_at: Some(self.started_at),
            uptime_seconds: uptime.as_secs(),
            uptime_human: format_uptime(uptime),
            lock_file: Some(self.lock_file.clone()),
            is_healthy: now - self.last_heartbeat <= self.self_staleness.as_secs_f64(),
            statistics: statistics.clone(),
        };

        if let Err(err) = self.write_atomic(&snapshot) {
            eprintln!("[MODSCAN-HEALTH] snapshot update failed: {err}");
        }
    }

    fn write_atomic(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let serialized = serde_json::to_string_pretty(snapshot)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serialized).map_err(|source| ScanError::io(&tmp, source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| ScanError::Snapshot {
            path: self.path.clone(),
            details: format!("atomic rename failed: {source}"),
        })
    }
}

/// `2d 3h 4m` style uptime for humans reading the snapshot.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(dir: &tempfile::TempDir) -> HealthReporter {
        HealthReporter::new(
            dir.path().join("modscan.status"),
            dir.path().join("modscan.pid"),
            Duration::from_secs(45),
        )
    }

    #[test]
    fn update_writes_a_complete_parseable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        reporter.update(DaemonStatus::Starting, "starting up", &CycleStatistics::default());

        let snapshot = HealthSnapshot::read(reporter.path()).unwrap();
        assert_eq!(snapshot.status.as_deref(), Some("starting"));
        assert_eq!(snapshot.message, "starting up");
        #[allow(clippy::cast_possible_wrap)]
        let me = std::process::id() as i32;
        assert_eq!(snapshot.pid, Some(me));
        assert!(snapshot.is_healthy);
        assert!(snapshot.last_heartbeat.is_some());
    }

    #[test]
    fn heartbeat_is_nondecreasing_across_updates() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        let stats = CycleStatistics::default();

        reporter.update(DaemonStatus::Idle, "tick", &stats);
        let first = HealthSnapshot::read(reporter.path()).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        reporter.update(DaemonStatus::Sleeping, "tock", &stats);
        let second = HealthSnapshot::read(reporter.path()).unwrap();

        assert!(second.last_heartbeat.unwrap() >= first.last_heartbeat.unwrap());
    }

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: HealthSnapshot = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert_eq!(snapshot.status.as_deref(), Some("running"));
        assert!(snapshot.last_heartbeat.is_none());
        assert!(!snapshot.is_healthy);
        assert_eq!(snapshot.statistics.total_cycles, 0);
    }

    #[test]
    fn unknown_fields_do_not_break_readers() {
        let snapshot: HealthSnapshot =
            serde_json::from_str(r#"{"status":"idle","future_field":42}"#).unwrap();
        assert_eq!(snapshot.status.as_deref(), Some("idle"));
    }

    #[test]
    fn uptime_formatting_matches_granularity() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "0m");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m");
        assert_eq!(format_uptime(Duration::from_secs(3_660)), "1h 1m");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m");
    }

    #[test]
    fn tmp_file_never_lingers() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = reporter(&dir);
        reporter.update(DaemonStatus::Idle, "tick", &CycleStatistics::default());
        assert!(!dir.path().join("modscan.status.tmp").exists());
    }
}
