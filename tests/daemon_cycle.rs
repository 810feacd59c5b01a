//! Daemon lifecycle through the public API: one failing device must not
//! stop the rest of the fleet from being polled, stored, and reported.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use modscan::core::config::{Config, RetentionConfig};
use modscan::core::errors::{Result, ScanError};
use modscan::daemon::health::HealthSnapshot;
use modscan::daemon::loop_main::{DaemonDeps, ScannerDaemon};
use modscan::scan::{DeviceDirectory, DeviceDriver, Modulation, ModulationRecord, RecordSink};
use modscan::sink::sqlite::SqliteSink;

struct StaticDirectory(Vec<String>);

impl DeviceDirectory for StaticDirectory {
    fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

struct FlakyDriver;

impl DeviceDriver for FlakyDriver {
    fn poll(&self, device: &str) -> Result<Vec<ModulationRecord>> {
        if device == "CCAP002" {
            return Err(ScanError::device(device, "connection timed out"));
        }
        Ok(vec![ModulationRecord {
            device: device.to_string(),
            upstream: "1/2.3/0".to_string(),
            modulation: Modulation::Qam64,
        }])
    }
}

#[test]
fn failing_device_is_isolated_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.paths.lock_file = dir.path().join("modscan.pid");
    config.paths.status_file = dir.path().join("modscan.status");
    config.paths.jsonl_log = dir.path().join("activity.jsonl");
    config.poller.check_interval_secs = 1;
    config.poller.heartbeat_interval_secs = 1;

    let sink = Arc::new(SqliteSink::open_in_memory(RetentionConfig::default()).unwrap());
    let record_sink: Arc<dyn RecordSink> = sink.clone();
    let deps = DaemonDeps {
        driver: Arc::new(FlakyDriver),
        directory: Arc::new(StaticDirectory(vec![
            "CCAP001".to_string(),
            "CCAP002".to_string(),
            "CCAP003".to_string(),
        ])),
        sink: record_sink,
        maintenance: None,
    };

    let status_path = config.paths.status_file.clone();
    let activity_path = config.paths.jsonl_log.clone();
    let mut daemon = ScannerDaemon::init(config, deps).expect("init");
    let shutdown = daemon.shutdown_handle();

    let runner = thread::spawn(move || daemon.run());
    thread::sleep(Duration::from_millis(500));
    shutdown.request();
    runner.join().unwrap().unwrap();

    // Healthy devices landed; the flaky one is absent but counted.
    assert_eq!(sink.row_count().unwrap(), 2);
    let marker = sink.last_processed().unwrap();
    assert!(marker.is_some(), "timestamp marker moves on cycle success");

    let snapshot = HealthSnapshot::read(&status_path).unwrap();
    assert_eq!(snapshot.status.as_deref(), Some("stopped"));
    assert_eq!(snapshot.statistics.devices_processed, 3);
    assert_eq!(snapshot.statistics.records_stored, 2);
    assert_eq!(snapshot.statistics.successful_cycles, 1);
    assert!(snapshot.last_successful_scan.is_some());

    // The per-device failure shows up in the activity log.
    let activity = std::fs::read_to_string(&activity_path).unwrap();
    assert!(activity.contains("device_failed"));
    assert!(activity.contains("CCAP002"));
    assert!(activity.contains("cycle_completed"));
}
