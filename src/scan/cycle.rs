//! One poll cycle: bounded worker-pool fan-out over the ready devices, with
//! a join barrier before the persistence-timestamp update.
//!
//! State machine: `idle → scanning → finishing → {success, error}`. The
//! cycle itself covers scanning through success/error; the daemon loop owns
//! idle and the sleep back to it. Per-device failures are absorbed here and
//! surface only as counters and log events — a single device never aborts
//! the cycle. Cycle-level failures (dispatch or the final timestamp update)
//! surface as `Err` and the daemon keeps looping; termination is the
//! supervisor's decision.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ScanError};
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::scan::{DeviceDriver, RecordSink};

/// Monotonically accumulating cycle counters, embedded by value into every
/// health snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleStatistics {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub devices_processed: u64,
    pub records_stored: u64,
    /// Incremental running mean over successful cycles; stays finite over
    /// arbitrarily long uptimes.
    pub average_cycle_secs: f64,
    pub last_cycle_secs: f64,
}

impl CycleStatistics {
    pub fn record_success(&mut self, devices: u64, records: u64, duration: Duration) {
        self.total_cycles += 1;
        self.successful_cycles += 1;
        self.devices_processed += devices;
        self.records_stored += records;
        let secs = duration.as_secs_f64();
        self.last_cycle_secs = secs;
        #[allow(clippy::cast_precision_loss)]
        let n = self.successful_cycles as f64;
        self.average_cycle_secs += (secs - self.average_cycle_secs) / n;
    }

    pub fn record_failure(&mut self, duration: Duration) {
        self.total_cycles += 1;
        self.failed_cycles += 1;
        self.last_cycle_secs = duration.as_secs_f64();
    }
}

/// Aggregated result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub devices_processed: usize,
    pub records_stored: usize,
    pub failed_devices: Vec<String>,
}

/// Per-device completion sent from a worker to the aggregation loop.
enum DeviceReport {
    Completed { device: String, records: usize },
    Failed { device: String, message: String },
}

/// Capacity for the worker→aggregator results channel.
const REPORT_CHANNEL_CAP: usize = 64;

/// Drives one round of polling against a fixed-size worker pool.
pub struct PollCycle {
    driver: Arc<dyn DeviceDriver>,
    sink: Arc<dyn RecordSink>,
    pool_size: usize,
    logger: ActivityLoggerHandle,
    stats: CycleStatistics,
}

impl PollCycle {
    #[must_use]
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        sink: Arc<dyn RecordSink>,
        pool_size: usize,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            driver,
            sink,
            pool_size: pool_size.max(1),
            logger,
            stats: CycleStatistics::default(),
        }
    }

    /// Accumulated statistics, for snapshot embedding.
    #[must_use]
    pub fn stats(&self) -> &CycleStatistics {
        &self.stats
    }

    /// Run one cycle over `ready`, invoking `on_device_done` after each
    /// device attempt completes (success or failure). Statistics are updated
    /// on both exits.
    pub fn run(
        &mut self,
        ready: Vec<String>,
        on_device_done: &mut dyn FnMut(&str, usize, usize),
    ) -> Result<CycleOutcome> {
        let started = Instant::now();
        match self.execute(ready, on_device_done) {
            Ok(outcome) => {
                self.stats.record_success(
                    outcome.devices_processed as u64,
                    outcome.records_stored as u64,
                    started.elapsed(),
                );
                Ok(outcome)
            }
            Err(err) => {
                self.stats.record_failure(started.elapsed());
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        ready: Vec<String>,
        on_device_done: &mut dyn FnMut(&str, usize, usize),
    ) -> Result<CycleOutcome> {
        let total = ready.len();
        if total == 0 {
            return Ok(CycleOutcome {
                devices_processed: 0,
                records_stored: 0,
                failed_devices: Vec::new(),
            });
        }

        // Work queue sized to the ready set so dispatch never blocks; the
        // pool size alone is the concurrency ceiling.
        let (work_tx, work_rx) = bounded::<String>(total);
        let (report_tx, report_rx) = bounded::<DeviceReport>(REPORT_CHANNEL_CAP);

        for device in ready {
            work_tx
                .send(device)
                .map_err(|_| ScanError::ChannelClosed { component: "work" })?;
        }
        drop(work_tx);

        let workers = self.spawn_workers(total.min(self.pool_size), &work_rx, &report_tx)?;
        drop(report_tx);

        // Aggregation: drain exactly one report per dispatched device.
        let mut outcome = CycleOutcome {
            devices_processed: 0,
            records_stored: 0,
            failed_devices: Vec::new(),
        };
        for done in 1..=total {
            let report = report_rx
                .recv()
                .map_err(|_| ScanError::ChannelClosed { component: "report" })?;
            let device = match report {
                DeviceReport::Completed { device, records } => {
                    outcome.devices_processed += 1;
                    outcome.records_stored += records;
                    device
                }
                DeviceReport::Failed { device, message } => {
                    outcome.devices_processed += 1;
                    self.logger.send(ActivityEvent::DeviceFailed {
                        device: device.clone(),
                        message,
                    });
                    outcome.failed_devices.push(device.clone());
                    device
                }
            };
            on_device_done(&device, done, total);
        }

        // Join barrier: every worker has exited before the timestamp moves.
        for handle in workers {
            if handle.join().is_err() {
                return Err(ScanError::Runtime {
                    details: "poll worker panicked".to_string(),
                });
            }
        }

        self.sink.mark_processed(Utc::now())?;
        Ok(outcome)
    }

    fn spawn_workers(
        &self,
        count: usize,
        work_rx: &crossbeam_channel::Receiver<String>,
        report_tx: &crossbeam_channel::Sender<DeviceReport>,
    ) -> Result<Vec<thread::JoinHandle<()>>> {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let work_rx = work_rx.clone();
            let report_tx = report_tx.clone();
            let driver = Arc::clone(&self.driver);
            let sink = Arc::clone(&self.sink);

            let handle = thread::Builder::new()
                .name(format!("modscan-worker-{index}"))
                .spawn(move || {
                    while let Ok(device) = work_rx.recv() {
                        let report = match poll_one(driver.as_ref(), sink.as_ref(), &device) {
                            Ok(records) => DeviceReport::Completed { device, records },
                            Err(err) => DeviceReport::Failed {
                                device,
                                message: err.to_string(),
                            },
                        };
                        if report_tx.send(report).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|source| ScanError::Runtime {
                    details: format!("failed to spawn poll worker: {source}"),
                })?;
            workers.push(handle);
        }
        Ok(workers)
    }
}

/// One worker task: drive the device, then hand its records to the sink.
/// The worker owns its device session for the whole task.
fn poll_one(driver: &dyn DeviceDriver, sink: &dyn RecordSink, device: &str) -> Result<usize> {
    let records = driver.poll(device)?;
    if !records.is_empty() {
        sink.store(device, &records)?;
    }
    Ok(records.len())
}
