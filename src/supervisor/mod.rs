//! External supervisor: reads the liveness snapshot, decides health, and
//! stops/starts the daemon with bounded, backed-off retries.
//!
//! Runs as a wholly separate process (normally on a fixed cron cadence);
//! the only channels to the daemon are the snapshot file and OS signals.
//! A supervisor sharing address space with a hung daemon could itself
//! hang — the decoupling is the point.

#![allow(missing_docs)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::core::config::Config;
use crate::core::errors::{Result, ScanError};
use crate::daemon::health::{HealthSnapshot, epoch_now};
use crate::platform::process;

/// Heartbeat ages beyond a year mean a corrupted snapshot, not a stale one.
const CORRUPT_HEARTBEAT_AGE_SECS: f64 = 31_536_000.0;

/// Result of one liveness evaluation.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    pub live: bool,
    pub reason: String,
    pub pid: Option<i32>,
    pub status: Option<String>,
    pub uptime_human: Option<String>,
    pub heartbeat_age_secs: Option<f64>,
}

impl LivenessProbe {
    fn dead(reason: impl Into<String>) -> Self {
        Self {
            live: false,
            reason: reason.into(),
            pid: None,
            status: None,
            uptime_human: None,
            heartbeat_age_secs: None,
        }
    }
}

/// Watchdog over the scanner daemon.
pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Evaluate liveness from the snapshot file alone.
    ///
    /// Liveness requires all of: file present and parses, recorded pid
    /// alive, heartbeat younger than the staleness threshold, and the
    /// daemon's own `is_healthy` verdict.
    #[must_use]
    pub fn probe(&self) -> LivenessProbe {
        let path = &self.config.paths.status_file;
        if !path.exists() {
            return LivenessProbe::dead("no status file found");
        }
        let snapshot = match HealthSnapshot::read(path) {
            Ok(snapshot) => snapshot,
            Err(err) => return LivenessProbe::dead(format!("status file unreadable: {err}")),
        };

        let Some(pid) = snapshot.pid else {
            return LivenessProbe::dead("no pid in status file");
        };
        if !process::is_alive(pid) {
            let mut probe = LivenessProbe::dead(format!("process {pid} not running"));
            probe.pid = Some(pid);
            probe.status = snapshot.status.clone();
            return probe;
        }

        let Some(age) = snapshot.heartbeat_age(epoch_now()) else {
            let mut probe = LivenessProbe::dead("no heartbeat recorded");
            probe.pid = Some(pid);
            return probe;
        };
        let mut probe = LivenessProbe {
            live: false,
            reason: String::new(),
            pid: Some(pid),
            status: snapshot.status.clone(),
            uptime_human: Some(snapshot.uptime_human.clone()),
            heartbeat_age_secs: Some(age),
        };
        if age > self.config.supervisor.staleness().as_secs_f64() {
            probe.reason = format!("heartbeat too old ({age:.0}s)");
            return probe;
        }
        if !snapshot.is_healthy {
            probe.reason = "process self-reported unhealthy".to_string();
            return probe;
        }

        probe.live = true;
        probe.reason = "running".to_string();
        probe
    }

    /// Main watchdog entry point: verify liveness and recover if needed.
    ///
    /// The restart counter lives in this invocation and resets to zero the
    /// moment the daemon is confirmed healthy. Once the ceiling is reached
    /// the terminal failure is reported exactly once and the caller exits
    /// non-zero; escalation beyond that is out of scope.
    pub fn check_and_recover(&self) -> Result<()> {
        self.log("INFO", "watchdog check starting");
        let probe = self.probe();
        if probe.live {
            self.log_running(&probe);
            return Ok(());
        }
        self.log("WARNING", &format!("scanner not running: {}", probe.reason));

        self.stop_stale_process();
        self.cleanup_stale_artifacts();

        let max_attempts = self.config.supervisor.max_restart_attempts;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            self.log(
                "INFO",
                &format!("restart attempt {attempts}/{max_attempts}"),
            );

            match self.start_daemon() {
                Ok(pid) => {
                    self.log("INFO", &format!("scanner started (pid {pid})"));
                    std::thread::sleep(self.config.supervisor.settle());
                    let verify = self.probe();
                    if verify.live {
                        self.log(
                            "INFO",
                            &format!("scanner recovered on attempt {attempts}"),
                        );
                        return Ok(());
                    }
                    self.log(
                        "WARNING",
                        &format!("verification failed after restart: {}", verify.reason),
                    );
                }
                Err(err) => {
                    self.log("ERROR", &format!("failed to start scanner: {err}"));
                }
            }

            if attempts >= max_attempts {
                self.log(
                    "ERROR",
                    &format!("TERMINAL: scanner not recovered after {attempts} restart attempts"),
                );
                return Err(ScanError::RestartExhausted { attempts });
            }

            let delay = jittered(self.config.supervisor.restart_delay());
            self.log(
                "INFO",
                &format!("waiting {:.0}s before next attempt", delay.as_secs_f64()),
            );
            std::thread::sleep(delay);
            self.stop_stale_process();
            self.cleanup_stale_artifacts();
        }
    }

    /// Start the daemon regardless of current state.
    pub fn force_start(&self) -> Result<u32> {
        let probe = self.probe();
        if probe.live {
            self.log(
                "INFO",
                &format!("scanner already running (pid {})", probe.pid.unwrap_or(0)),
            );
            return Err(ScanError::Supervisor {
                details: "scanner already running".to_string(),
            });
        }
        let pid = self.start_daemon()?;
        self.log("INFO", &format!("scanner started (pid {pid})"));
        Ok(pid)
    }

    /// Stop a running daemon, escalating from SIGTERM to SIGKILL.
    pub fn force_stop(&self) -> Result<()> {
        let pids = self.known_pids();
        let mut stopped_any = false;
        for pid in pids {
            if process::is_alive(pid) {
                stopped_any = true;
                if !self.stop_process(pid) {
                    return Err(ScanError::Supervisor {
                        details: format!("failed to stop process {pid}"),
                    });
                }
            }
        }
        if !stopped_any {
            self.log("INFO", "scanner is not running");
        }
        Ok(())
    }

    fn log_running(&self, probe: &LivenessProbe) {
        let age = probe.heartbeat_age_secs.unwrap_or(0.0);
        self.log(
            "INFO",
            &format!(
                "scanner RUNNING (pid {}, status {}, uptime {}, heartbeat {age:.0}s ago)",
                probe.pid.unwrap_or(0),
                probe.status.as_deref().unwrap_or("unknown"),
                probe.uptime_human.as_deref().unwrap_or("unknown"),
            ),
        );
        // Early warning while still under the threshold.
        let warn_at = self.config.supervisor.staleness().as_secs_f64() * 0.75;
        if age > warn_at {
            self.log(
                "WARNING",
                &format!(
                    "heartbeat is getting old ({age:.0}s, threshold {}s)",
                    self.config.supervisor.staleness_secs
                ),
            );
        }
    }

    // ──────────────────── stop/start plumbing ────────────────────

    /// Candidate pids from the snapshot and the lock file.
    fn known_pids(&self) -> Vec<i32> {
        let mut pids = Vec::new();
        if let Ok(snapshot) = HealthSnapshot::read(&self.config.paths.status_file)
            && let Some(pid) = snapshot.pid
        {
            pids.push(pid);
        }
        if let Ok(raw) = std::fs::read_to_string(&self.config.paths.lock_file)
            && let Ok(pid) = raw.trim().parse::<i32>()
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
        pids
    }

    fn stop_stale_process(&self) {
        for pid in self.known_pids() {
            if process::is_alive(pid) {
                self.log("INFO", &format!("found running process {pid}, stopping it"));
                self.stop_process(pid);
            }
        }
    }

    /// SIGTERM, wait the grace period, SIGKILL if still alive. Returns true
    /// once the process is gone. The supervisor has no visibility into
    /// in-flight work and must assume the worst.
    fn stop_process(&self, pid: i32) -> bool {
        self.log("INFO", &format!("stopping scanner process {pid}"));
        let _ = process::terminate(pid);
        if process::wait_for_exit(pid, self.config.supervisor.stop_grace()) {
            self.log("INFO", &format!("process {pid} stopped gracefully"));
            return true;
        }

        self.log(
            "WARNING",
            &format!("process {pid} did not stop gracefully, force killing"),
        );
        let _ = process::force_kill(pid);
        if process::wait_for_exit(pid, Duration::from_secs(2)) {
            self.log("INFO", &format!("process {pid} force killed"));
            return true;
        }
        self.log("ERROR", &format!("failed to stop process {pid}"));
        false
    }

    /// Remove leftover lock and status files so a fresh daemon starts clean.
    fn cleanup_stale_artifacts(&self) {
        let lock = &self.config.paths.lock_file;
        if lock.exists() {
            let _ = std::fs::remove_file(lock);
            self.log("INFO", "removed stale pid file");
        }

        let status = &self.config.paths.status_file;
        if status.exists() {
            match HealthSnapshot::read(status) {
                Ok(snapshot) => {
                    if snapshot
                        .heartbeat_age(epoch_now())
                        .is_some_and(|age| age > CORRUPT_HEARTBEAT_AGE_SECS)
                    {
                        self.log("WARNING", "status file carries a corrupted timestamp");
                    }
                }
                Err(_) => {
                    self.log("WARNING", "status file is corrupted (invalid JSON)");
                }
            }
            let _ = std::fs::remove_file(status);
            self.log("INFO", "removed stale status file");
        }
    }

    /// Spawn a detached daemon process, capturing startup stderr for
    /// post-mortem reads.
    fn start_daemon(&self) -> Result<u32> {
        let command = &self.config.supervisor.daemon_command;
        let (program, args): (PathBuf, Vec<String>) = if command.is_empty() {
            let exe = std::env::current_exe().map_err(|source| ScanError::Supervisor {
                details: format!("cannot locate own executable: {source}"),
            })?;
            (exe, vec!["daemon".to_string()])
        } else {
            (PathBuf::from(&command[0]), command[1..].to_vec())
        };

        let startup_log = self
            .config
            .paths
            .status_file
            .with_file_name("modscan.startup.log");
        let stderr = std::fs::File::create(&startup_log)
            .map(Stdio::from)
            .unwrap_or_else(|_| Stdio::null());

        let child = {
            use std::os::unix::process::CommandExt;
            Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(stderr)
                // Detach from the supervisor's session so the daemon
                // survives the cron invocation.
                .process_group(0)
                .spawn()
                .map_err(|source| ScanError::Supervisor {
                    details: format!("failed to spawn {}: {source}", program.display()),
                })?
        };
        Ok(child.id())
    }

    /// Append to the supervisor log and echo to stdout. File errors are
    /// swallowed; the watchdog must keep working without its log.
    fn log(&self, level: &str, message: &str) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        println!("{timestamp} [{level}] {message}");

        let path = &self.config.paths.supervisor_log;
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            let _ = writeln!(file, "[{timestamp}] [{level}] {message}");
        }
    }
}

/// Restart delay with up to 25% additive jitter, so multiple supervisors
/// fired by the same cron minute do not hammer in lockstep.
fn jittered(delay: Duration) -> Duration {
    let max_extra = delay.as_millis() as u64 / 4;
    if max_extra == 0 {
        return delay;
    }
    let extra = rand::rng().random_range(0..=max_extra);
    delay + Duration::from_millis(extra)
}
