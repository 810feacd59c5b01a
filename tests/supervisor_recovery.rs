//! End-to-end supervisor recovery against a fake daemon process.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use modscan::core::config::Config;
use modscan::core::errors::ScanError;
use modscan::supervisor::Supervisor;

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.paths.lock_file = dir.path().join("modscan.pid");
    config.paths.status_file = dir.path().join("modscan.status");
    config.paths.supervisor_log = dir.path().join("supervisor.log");
    config.supervisor.settle_secs = 2;
    config.supervisor.restart_delay_secs = 0;
    config.supervisor.stop_grace_secs = 2;
    config.supervisor.max_restart_attempts = 3;
    config
}

/// A stand-in daemon: records its own pid and a fresh heartbeat the way the
/// real daemon would, then idles until stopped.
fn write_fake_daemon(dir: &Path, status_path: &Path) -> std::path::PathBuf {
    let script_path = dir.join("fake_daemon.sh");
    let script = format!(
        "#!/bin/sh\n\
         printf '{{\"pid\": %d, \"last_heartbeat\": %d, \"is_healthy\": true, \
         \"status\": \"sleeping\", \"uptime_human\": \"0m\"}}' \"$$\" \"$(date +%s)\" > {}\n\
         sleep 300\n",
        status_path.display()
    );
    std::fs::write(&script_path, script).unwrap();
    let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

fn write_stale_snapshot(status_path: &Path) {
    // Dead pid, heartbeat far past any staleness threshold.
    std::fs::write(
        status_path,
        r#"{"pid": 1073741808, "last_heartbeat": 1000000.0, "is_healthy": true, "status": "sleeping"}"#,
    )
    .unwrap();
}

#[test]
fn stale_daemon_is_recovered_within_the_restart_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let script = write_fake_daemon(dir.path(), &config.paths.status_file);
    let mut config = config;
    config.supervisor.daemon_command = vec![script.display().to_string()];

    write_stale_snapshot(&config.paths.status_file);
    let supervisor = Supervisor::new(config.clone());
    assert!(!supervisor.probe().live);

    let per_attempt = config.supervisor.restart_delay_secs + config.supervisor.settle_secs + 5;
    let budget =
        Duration::from_secs(u64::from(config.supervisor.max_restart_attempts) * per_attempt);
    let started = Instant::now();
    supervisor.check_and_recover().expect("recovery succeeds");
    assert!(started.elapsed() <= budget);

    let probe = supervisor.probe();
    assert!(probe.live, "unexpected reason: {}", probe.reason);

    // A second check against the now-live daemon is a no-op.
    supervisor.check_and_recover().expect("healthy short-circuit");

    // Stop path: SIGTERM within the grace period is enough for the script.
    supervisor.force_stop().expect("stop fake daemon");
    std::thread::sleep(Duration::from_millis(300));
    let pid = modscan::daemon::health::HealthSnapshot::read(&config.paths.status_file)
        .ok()
        .and_then(|s| s.pid);
    if let Some(pid) = pid {
        assert!(!modscan::platform::process::is_alive(pid));
    }
}

#[test]
fn exhausted_restart_budget_reports_terminal_failure_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.supervisor.daemon_command = vec!["/bin/false".to_string()];
    config.supervisor.settle_secs = 0;
    write_stale_snapshot(&config.paths.status_file);

    let supervisor = Supervisor::new(config.clone());
    let err = supervisor.check_and_recover().unwrap_err();
    assert!(matches!(err, ScanError::RestartExhausted { attempts: 3 }));

    let log = std::fs::read_to_string(&config.paths.supervisor_log).unwrap();
    let attempts = log.matches("restart attempt").count();
    assert_eq!(attempts, 3, "log:\n{log}");
    let terminal = log.matches("TERMINAL").count();
    assert_eq!(terminal, 1, "terminal failure must be reported exactly once");
}
