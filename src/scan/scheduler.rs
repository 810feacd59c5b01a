//! Per-device scan scheduling: wall-clock interval gating over an in-memory
//! timer map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Decides, per device, whether enough time has elapsed since its last scan.
///
/// A device is ready iff it has never been scanned or its interval has
/// elapsed. `mark_scanned` is the only mutator and is called after every
/// attempt, success or failure — the scan interval is the only retry backoff
/// for unreachable devices.
#[derive(Debug)]
pub struct DeviceScheduler {
    interval: Duration,
    last_scan: HashMap<String, Instant>,
}

impl DeviceScheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_scan: HashMap::new(),
        }
    }

    /// Subset of `all_devices` due for a scan at `now`. Order is
    /// unspecified; downstream processing is concurrent.
    #[must_use]
    pub fn ready_devices(&self, all_devices: &[String], now: Instant) -> Vec<String> {
        all_devices
            .iter()
            .filter(|device| self.is_ready(device, now))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_ready(&self, device: &str, now: Instant) -> bool {
        self.last_scan
            .get(device)
            .is_none_or(|last| now.duration_since(*last) >= self.interval)
    }

    /// Record a completed attempt for `device`. Consumes the device's slot
    /// until `now + interval`.
    pub fn mark_scanned(&mut self, device: &str, now: Instant) {
        self.last_scan.insert(device.to_string(), now);
    }

    /// Drop timers for devices no longer in the directory. Not required for
    /// correctness (absent devices are simply never consulted), only bounds
    /// memory across fleet churn.
    pub fn prune(&mut self, current_devices: &[String]) {
        if self.last_scan.len() <= current_devices.len() {
            return;
        }
        let keep: std::collections::HashSet<&str> =
            current_devices.iter().map(String::as_str).collect();
        self.last_scan.retain(|device, _| keep.contains(device.as_str()));
    }

    /// Number of devices with a recorded scan.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_scan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn unseen_devices_are_ready() {
        let scheduler = DeviceScheduler::new(Duration::from_secs(600));
        let all = devices(&["CCAP001", "CCAP100"]);
        let ready = scheduler.ready_devices(&all, Instant::now());
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn marked_device_is_not_ready_until_interval_elapses() {
        let mut scheduler = DeviceScheduler::new(Duration::from_secs(600));
        let all = devices(&["CCAP001"]);
        let t0 = Instant::now();

        scheduler.mark_scanned("CCAP001", t0);
        assert!(scheduler.ready_devices(&all, t0).is_empty());
        assert!(
            scheduler
                .ready_devices(&all, t0 + Duration::from_secs(599))
                .is_empty()
        );
        assert_eq!(
            scheduler.ready_devices(&all, t0 + Duration::from_secs(600)),
            all
        );
    }

    #[test]
    fn remark_resets_the_window() {
        let mut scheduler = DeviceScheduler::new(Duration::from_secs(10));
        let t0 = Instant::now();
        scheduler.mark_scanned("CCAP001", t0);
        scheduler.mark_scanned("CCAP001", t0 + Duration::from_secs(9));
        assert!(!scheduler.is_ready("CCAP001", t0 + Duration::from_secs(12)));
        assert!(scheduler.is_ready("CCAP001", t0 + Duration::from_secs(19)));
    }

    #[test]
    fn shrunken_directory_entries_are_pruned() {
        let mut scheduler = DeviceScheduler::new(Duration::from_secs(600));
        let t0 = Instant::now();
        scheduler.mark_scanned("CCAP001", t0);
        scheduler.mark_scanned("CCAP002", t0);
        scheduler.mark_scanned("CCAP100", t0);

        scheduler.prune(&devices(&["CCAP001"]));
        assert_eq!(scheduler.tracked(), 1);
        // The surviving timer still gates its device.
        assert!(!scheduler.is_ready("CCAP001", t0));
    }

    #[test]
    fn ready_set_is_a_subset_of_input() {
        let mut scheduler = DeviceScheduler::new(Duration::from_secs(600));
        scheduler.mark_scanned("CCAP999", Instant::now());
        let all = devices(&["CCAP001"]);
        let ready = scheduler.ready_devices(&all, Instant::now());
        assert_eq!(ready, all);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Readiness is exactly "never scanned, or interval elapsed".
            #[test]
            fn readiness_matches_contract(
                interval_secs in 1u64..3600,
                mark_offset in proptest::option::of(0u64..7200),
                probe_offset in 0u64..14_400,
            ) {
                let base = Instant::now();
                let mut scheduler = DeviceScheduler::new(Duration::from_secs(interval_secs));
                if let Some(offset) = mark_offset {
                    scheduler.mark_scanned("CCAP042", base + Duration::from_secs(offset));
                }
                let now = base + Duration::from_secs(probe_offset);
                let expected = match mark_offset {
                    None => true,
                    // Instant::duration_since saturates to zero for a mark
                    // in the probe's future.
                    Some(mark) => probe_offset.saturating_sub(mark) >= interval_secs,
                };
                prop_assert_eq!(scheduler.is_ready("CCAP042", now), expected);
            }

            /// After mark_scanned(d, t), d is ready again exactly at t + interval.
            #[test]
            fn mark_consumes_exactly_one_interval(
                interval_secs in 1u64..3600,
            ) {
                let base = Instant::now();
                let interval = Duration::from_secs(interval_secs);
                let mut scheduler = DeviceScheduler::new(interval);
                scheduler.mark_scanned("CCAP042", base);
                prop_assert!(!scheduler.is_ready("CCAP042", base + interval - Duration::from_nanos(1)));
                prop_assert!(scheduler.is_ready("CCAP042", base + interval));
            }
        }
    }
}
