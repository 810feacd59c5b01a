//! Scan core: collaborator seams, per-device scheduling, and the poll cycle.

#![allow(missing_docs)]

pub mod cycle;
pub mod scheduler;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

/// Upstream modulation states the fleet reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "QPSK")]
    Qpsk,
    #[serde(rename = "QAM16")]
    Qam16,
    #[serde(rename = "QAM64")]
    Qam64,
}

impl Modulation {
    /// Canonical wire/database spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qpsk => "QPSK",
            Self::Qam16 => "QAM16",
            Self::Qam64 => "QAM64",
        }
    }
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted upstream modulation reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulationRecord {
    pub device: String,
    pub upstream: String,
    pub modulation: Modulation,
}

/// Device driver collaborator: polls one device and extracts its records.
///
/// Latency and content are opaque to the cycle; a worker owns one driver
/// session for the whole task.
pub trait DeviceDriver: Send + Sync {
    /// Poll a single device. A failure here is a per-device transient
    /// failure: logged and retried on the next scheduled cycle.
    fn poll(&self, device: &str) -> Result<Vec<ModulationRecord>>;
}

/// Persistence sink collaborator.
pub trait RecordSink: Send + Sync {
    /// Store a batch of records for one device.
    fn store(&self, device: &str, records: &[ModulationRecord]) -> Result<()>;

    /// Advance the "last processed" marker. Called strictly after all device
    /// tasks in a cycle have completed.
    fn mark_processed(&self, at: chrono::DateTime<chrono::Utc>) -> Result<()>;
}

/// Device directory collaborator: the current set of known devices.
pub trait DeviceDirectory: Send + Sync {
    fn list_devices(&self) -> Result<Vec<String>>;
}

/// Retention collaborator. The cycle only ever triggers a non-blocking
/// check; failures are logged warnings, never cycle failures.
pub trait MaintenanceHook: Send + Sync {
    fn run_check(&self) -> Result<MaintenanceSummary>;
}

/// Outcome of a maintenance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub rows_before: u64,
    pub rows_pruned: u64,
    /// Set when table growth is past the warning threshold.
    pub degraded: bool,
}
