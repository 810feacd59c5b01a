//! Structured activity logging: a dedicated logger thread fed through a
//! bounded channel, writing JSONL with graceful degradation. A full channel
//! drops events (and counts the drops) rather than ever blocking the daemon
//! loop.

pub mod jsonl;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, bounded};
use serde::Serialize;

use crate::core::errors::{Result, ScanError};
use crate::logger::jsonl::{JsonlConfig, JsonlWriter};

/// Events the daemon and supervisor record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        pid: u32,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    CycleCompleted {
        devices: usize,
        records: usize,
        failed_devices: usize,
        duration_ms: u64,
    },
    CycleFailed {
        code: String,
        message: String,
    },
    DeviceFailed {
        device: String,
        message: String,
    },
    MaintenanceDegraded {
        rows: u64,
    },
    SupervisorAction {
        action: String,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Serialize)]
struct ActivityLine<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a ActivityEvent,
}

enum LogCommand {
    Event(Box<ActivityEvent>),
    Shutdown,
}

/// Cloneable handle for submitting events to the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Option<Sender<LogCommand>>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle that discards everything. For collaborators running without
    /// a logger thread (one-shot commands, tests).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Submit an event. Never blocks; a full or closed channel increments
    /// the drop counter instead.
    pub fn send(&self, event: ActivityEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.try_send(LogCommand::Event(Box::new(event))).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost to backpressure since startup.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LogCommand::Shutdown);
        }
    }
}

/// Channel capacity between producers and the logger thread.
const LOG_CHANNEL_CAP: usize = 1024;

/// Spawn the logger thread. The caller keeps the join handle and joins it
/// after `shutdown()` during the daemon's exit sequence.
pub fn spawn_logger(config: JsonlConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let mut writer = JsonlWriter::open(config)?;
    let (tx, rx) = bounded::<LogCommand>(LOG_CHANNEL_CAP);

    let join = thread::Builder::new()
        .name("modscan-logger".to_string())
        .spawn(move || {
            while let Ok(command) = rx.recv() {
                match command {
                    LogCommand::Event(event) => {
                        let line = ActivityLine {
                            ts: Utc::now(),
                            event: &event,
                        };
                        match serde_json::to_string(&line) {
                            Ok(serialized) => {
                                if let Err(err) = writer.append(&serialized) {
                                    eprintln!("[MODSCAN-LOGGER] write failed: {err}");
                                }
                            }
                            Err(err) => {
                                eprintln!("[MODSCAN-LOGGER] serialization failed: {err}");
                            }
                        }
                    }
                    LogCommand::Shutdown => break,
                }
            }
            let _ = writer.flush();
        })
        .map_err(|source| ScanError::Runtime {
            details: format!("failed to spawn logger thread: {source}"),
        })?;

    Ok((
        ActivityLoggerHandle {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        join,
    ))
}
