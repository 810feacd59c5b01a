//! MS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Top-level error type for modscan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("[MS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[MS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[MS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[MS-2001] another instance is already running (pid {pid})")]
    AlreadyRunning { pid: i32 },

    #[error("[MS-2002] lock failure at {path}: {details}")]
    Lock { path: PathBuf, details: String },

    #[error("[MS-3001] device {device} failed: {details}")]
    Device { device: String, details: String },

    #[error("[MS-3002] device directory failure: {details}")]
    Directory { details: String },

    #[error("[MS-3101] sink failure in {context}: {details}")]
    Sink {
        context: &'static str,
        details: String,
    },

    #[error("[MS-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[MS-4001] snapshot failure at {path}: {details}")]
    Snapshot { path: PathBuf, details: String },

    #[error("[MS-5001] supervisor failure: {details}")]
    Supervisor { details: String },

    #[error("[MS-5002] daemon not recovered after {attempts} restart attempts")]
    RestartExhausted { attempts: u32 },

    #[error("[MS-3801] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MS-3802] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[MS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ScanError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MS-1001",
            Self::MissingConfig { .. } => "MS-1002",
            Self::ConfigParse { .. } => "MS-1003",
            Self::AlreadyRunning { .. } => "MS-2001",
            Self::Lock { .. } => "MS-2002",
            Self::Device { .. } => "MS-3001",
            Self::Directory { .. } => "MS-3002",
            Self::Sink { .. } => "MS-3101",
            Self::Serialization { .. } => "MS-2101",
            Self::Snapshot { .. } => "MS-4001",
            Self::Supervisor { .. } => "MS-5001",
            Self::RestartExhausted { .. } => "MS-5002",
            Self::Io { .. } => "MS-3801",
            Self::ChannelClosed { .. } => "MS-3802",
            Self::Runtime { .. } => "MS-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Per-device and sink failures re-enter the pool on the next scheduled
    /// cycle; lock contention and restart exhaustion are terminal for the
    /// caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Device { .. }
                | Self::Directory { .. }
                | Self::Sink { .. }
                | Self::Snapshot { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for per-device failures.
    #[must_use]
    pub fn device(device: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ScanError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sink {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
