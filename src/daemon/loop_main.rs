//! Daemon main loop: exclusive-instance startup, heartbeat-sliced sleeps,
//! and cycle orchestration.
//!
//! Single process, one outer cooperative loop plus the cycle's bounded
//! worker pool. Per-device and per-cycle errors never unwind past this
//! loop; only process-level faults terminate the daemon, and recovery from
//! those is the supervisor's job, never the daemon's own.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::health::{DaemonStatus, HealthReporter};
use crate::daemon::lock::InstanceLock;
use crate::daemon::signals::ShutdownFlag;
use crate::logger::jsonl::JsonlConfig;
use crate::logger::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::scan::cycle::PollCycle;
use crate::scan::scheduler::DeviceScheduler;
use crate::scan::{DeviceDirectory, DeviceDriver, MaintenanceHook, RecordSink};

/// Slice used inside sleeps so a termination request is noticed promptly.
const SIGNAL_POLL_SLICE: Duration = Duration::from_millis(250);

/// Emit a scanning-progress snapshot every N completed devices.
const PROGRESS_EVERY_DEVICES: usize = 5;

// ──────────────────── collaborators ────────────────────

/// Collaborators injected into the daemon.
pub struct DaemonDeps {
    pub driver: Arc<dyn DeviceDriver>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub sink: Arc<dyn RecordSink>,
    pub maintenance: Option<Arc<dyn MaintenanceHook>>,
}

/// The long-running poller process.
pub struct ScannerDaemon {
    config: Config,
    directory: Arc<dyn DeviceDirectory>,
    maintenance: Option<Arc<dyn MaintenanceHook>>,
    lock: InstanceLock,
    reporter: HealthReporter,
    shutdown: ShutdownFlag,
    scheduler: DeviceScheduler,
    cycle: PollCycle,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    start_time: Instant,
}

impl std::fmt::Debug for ScannerDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerDaemon").finish_non_exhaustive()
    }
}

impl ScannerDaemon {
    /// Build and initialize the daemon: lock first, everything else after.
    ///
    /// A denied lock surfaces as `MS-2001` and the caller exits non-zero
    /// without side effects.
    pub fn init(config: Config, deps: DaemonDeps) -> Result<Self> {
        let lock = InstanceLock::acquire(&config.paths.lock_file)?;

        // Logging degrades gracefully: a daemon that cannot open its log
        // still polls and still heartbeats.
        let (logger, logger_join) =
            match spawn_logger(JsonlConfig::new(config.paths.jsonl_log.clone())) {
                Ok((handle, join)) => (handle, Some(join)),
                Err(err) => {
                    eprintln!("[MODSCAN-DAEMON] activity log unavailable: {err}");
                    (ActivityLoggerHandle::disabled(), None)
                }
            };

        let shutdown = ShutdownFlag::install()?;
        let reporter = HealthReporter::new(
            config.paths.status_file.clone(),
            config.paths.lock_file.clone(),
            config.poller.self_staleness(),
        );
        let scheduler = DeviceScheduler::new(config.poller.device_scan_interval());
        let cycle = PollCycle::new(
            deps.driver,
            deps.sink,
            config.poller.pool_size,
            logger.clone(),
        );

        Ok(Self {
            config,
            directory: deps.directory,
            maintenance: deps.maintenance,
            lock,
            reporter,
            shutdown,
            scheduler,
            cycle,
            logger,
            logger_join,
            start_time: Instant::now(),
        })
    }

    /// A handle that lets an embedder (or test) request shutdown the same
    /// way a signal would.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Run until a termination request. This is the entry point for
    /// `modscan daemon`.
    pub fn run(&mut self) -> Result<()> {
        self.logger.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        });
        eprintln!(
            "[MODSCAN-DAEMON] starting continuous scanning (check every {}s, device interval {}s, pool {})",
            self.config.poller.check_interval_secs,
            self.config.poller.device_scan_interval_secs,
            self.config.poller.pool_size,
        );
        self.reporter.update(
            DaemonStatus::Starting,
            "starting continuous per-device scanning",
            self.cycle.stats(),
        );

        loop {
            if self.shutdown.is_set() {
                break;
            }
            self.tick();
            if self.shutdown.is_set() {
                break;
            }
            self.sleep_between_checks();
        }

        self.finish();
        Ok(())
    }

    // ──────────────────── cycle orchestration ────────────────────

    /// One outer-loop iteration: find ready devices and run a cycle, or
    /// report idle.
    fn tick(&mut self) {
        self.reporter.update(
            DaemonStatus::Idle,
            "checking for ready devices",
            self.cycle.stats(),
        );

        let devices = match self.directory.list_devices() {
            Ok(devices) => devices,
            Err(err) => {
                // Directory failure is a cycle-level error: report and keep
                // looping.
                eprintln!("[MODSCAN-DAEMON] device directory failed: {err}");
                self.logger.send(ActivityEvent::CycleFailed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                self.reporter.update(
                    DaemonStatus::Error,
                    &format!("device directory failed: {err}"),
                    self.cycle.stats(),
                );
                return;
            }
        };

        self.scheduler.prune(&devices);
        let ready = self.scheduler.ready_devices(&devices, Instant::now());
        if ready.is_empty() {
            self.reporter.update(
                DaemonStatus::Idle,
                &format!("no devices ready for scanning (0/{})", devices.len()),
                self.cycle.stats(),
            );
            return;
        }

        eprintln!(
            "[MODSCAN-DAEMON] {} of {} devices ready for scanning",
            ready.len(),
            devices.len()
        );
        self.reporter.update(
            DaemonStatus::Scanning,
            &format!("scanning {} ready devices", ready.len()),
            self.cycle.stats(),
        );
        self.run_maintenance_check();

        let started = Instant::now();
        let Self {
            scheduler,
            reporter,
            cycle,
            ..
        } = self;
        let stats_before = cycle.stats().clone();

        let result = cycle.run(ready, &mut |device, done, total| {
            // A completed attempt consumes the device's slot, success or
            // failure: the scan interval is the retry backoff.
            scheduler.mark_scanned(device, Instant::now());
            if done == total {
                reporter.update(
                    DaemonStatus::Finishing,
                    "all device tasks completed, updating processed marker",
                    &stats_before,
                );
            } else if done % PROGRESS_EVERY_DEVICES == 0 {
                let pct = done * 100 / total;
                reporter.update(
                    DaemonStatus::Scanning,
                    &format!("processing devices: {done}/{total} ({pct}%)"),
                    &stats_before,
                );
            }
        });

        let duration = started.elapsed();
        match result {
            Ok(outcome) => {
                self.reporter.mark_success();
                #[allow(clippy::cast_possible_truncation)]
                self.logger.send(ActivityEvent::CycleCompleted {
                    devices: outcome.devices_processed,
                    records: outcome.records_stored,
                    failed_devices: outcome.failed_devices.len(),
                    duration_ms: duration.as_millis() as u64,
                });
                self.log_statistics();
                self.reporter.update(
                    DaemonStatus::Success,
                    &format!(
                        "cycle completed in {:.1}s, processed {} devices, stored {} records",
                        duration.as_secs_f64(),
                        outcome.devices_processed,
                        outcome.records_stored,
                    ),
                    self.cycle.stats(),
                );
            }
            Err(err) => {
                eprintln!("[MODSCAN-DAEMON] cycle failed: {err}");
                self.logger.send(ActivityEvent::CycleFailed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                self.reporter.update(
                    DaemonStatus::Error,
                    &format!("cycle failed after {:.1}s: {err}", duration.as_secs_f64()),
                    self.cycle.stats(),
                );
            }
        }
    }

    /// Non-blocking retention check. Failures are warnings, never cycle
    /// failures.
    fn run_maintenance_check(&mut self) {
        if !self.config.retention.auto_cleanup {
            return;
        }
        let Some(hook) = &self.maintenance else {
            return;
        };
        match hook.run_check() {
            Ok(summary) => {
                if summary.rows_pruned > 0 {
                    eprintln!(
                        "[MODSCAN-DAEMON] retention pruned {} rows ({} remain)",
                        summary.rows_pruned,
                        summary.rows_before.saturating_sub(summary.rows_pruned),
                    );
                }
                if summary.degraded {
                    eprintln!(
                        "[MODSCAN-DAEMON] WARNING: modulation table at {} rows needs maintenance",
                        summary.rows_before
                    );
                    self.logger.send(ActivityEvent::MaintenanceDegraded {
                        rows: summary.rows_before,
                    });
                }
            }
            Err(err) => {
                eprintln!("[MODSCAN-DAEMON] maintenance check failed (non-critical): {err}");
            }
        }
    }

    /// Sleep the check interval in heartbeat sub-intervals, bailing out
    /// promptly on a termination request.
    fn sleep_between_checks(&mut self) {
        let interval = self.config.poller.check_interval();
        let heartbeat_every = self.config.poller.heartbeat_interval();
        self.reporter.update(
            DaemonStatus::Sleeping,
            &format!("waiting {}s until next check", interval.as_secs()),
            self.cycle.stats(),
        );

        let started = Instant::now();
        let mut last_beat = Instant::now();
        while started.elapsed() < interval {
            if self.shutdown.is_set() {
                return;
            }
            let remaining = interval.saturating_sub(started.elapsed());
            thread::sleep(remaining.min(SIGNAL_POLL_SLICE));
            if last_beat.elapsed() >= heartbeat_every {
                let left = interval.saturating_sub(started.elapsed());
                self.reporter.update(
                    DaemonStatus::Sleeping,
                    &format!("sleeping, {}s remaining until next check", left.as_secs()),
                    self.cycle.stats(),
                );
                last_beat = Instant::now();
            }
        }
    }

    fn log_statistics(&self) {
        let stats = self.cycle.stats();
        eprintln!(
            "[MODSCAN-DAEMON] cycles={} ok={} failed={} devices={} records={} avg={:.1}s last={:.1}s",
            stats.total_cycles,
            stats.successful_cycles,
            stats.failed_cycles,
            stats.devices_processed,
            stats.records_stored,
            stats.average_cycle_secs,
            stats.last_cycle_secs,
        );
    }

    // ──────────────────── shutdown ────────────────────

    /// Shutdown sequence: final snapshots, logger flush, lock release. The
    /// status file is left in place for the supervisor to read.
    fn finish(&mut self) {
        eprintln!("[MODSCAN-DAEMON] shutdown requested, stopping scanner");
        self.reporter.update(
            DaemonStatus::ShuttingDown,
            "received termination request, stopping scanner",
            self.cycle.stats(),
        );

        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger.send(ActivityEvent::DaemonStopped {
            reason: "clean shutdown".to_string(),
            uptime_secs,
        });
        self.reporter.update(
            DaemonStatus::Stopped,
            "scanner stopped normally",
            self.cycle.stats(),
        );

        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        self.lock.release();
        eprintln!("[MODSCAN-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
