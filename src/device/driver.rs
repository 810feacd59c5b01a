//! Dialect routing and per-device command flows.
//!
//! A device's hostname decides its CLI dialect; the driver runs that
//! dialect's command sequence over a [`CommandTransport`] session and hands
//! the raw output to the parsers. Each worker gets its own session for the
//! whole task.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::Result;
use crate::device::parse;
use crate::scan::{DeviceDriver, ModulationRecord};

/// One connected CLI session against a device.
pub trait DeviceSession: Send {
    /// Run a command and return its raw output.
    fn run(&mut self, command: &str) -> Result<String>;
}

/// Opens CLI sessions. Implementations own credentials and timeouts.
pub trait CommandTransport: Send + Sync {
    fn connect(&self, device: &str) -> Result<Box<dyn DeviceSession>>;
}

/// The three CCAP CLI dialects in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Ccap0,
    Ccap1,
    Ccap2,
}

static CCAP0: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CCAP0\d{2}").expect("static regex"));
static CCAP1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CCAP1\d{2}").expect("static regex"));
static CCAP2: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"CCAP2\d{2}").expect("static regex"));

impl Dialect {
    /// Route a hostname to its dialect.
    #[must_use]
    pub fn for_device(device: &str) -> Option<Self> {
        if CCAP0.is_match(device) {
            Some(Self::Ccap0)
        } else if CCAP1.is_match(device) {
            Some(Self::Ccap1)
        } else if CCAP2.is_match(device) {
            Some(Self::Ccap2)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ccap0 => "ccap0",
            Self::Ccap1 => "ccap1",
            Self::Ccap2 => "ccap2",
        }
    }
}

/// Interface cap for the CCAP1 per-interface fallback; keeps a degraded
/// device from eating its worker's whole cycle.
const CCAP1_FALLBACK_MAX_INTERFACES: usize = 20;

/// Text-scraping driver over a pluggable transport.
pub struct TextCommandDriver {
    transport: Arc<dyn CommandTransport>,
    debug_dialects: Vec<String>,
}

impl TextCommandDriver {
    #[must_use]
    pub fn new(transport: Arc<dyn CommandTransport>, debug_dialects: &[String]) -> Self {
        Self {
            transport,
            debug_dialects: debug_dialects.to_vec(),
        }
    }

    fn debug_enabled(&self, dialect: Dialect) -> bool {
        self.debug_dialects.iter().any(|d| d == dialect.name())
    }

    fn poll_ccap0(&self, session: &mut dyn DeviceSession, device: &str) -> Result<Vec<ModulationRecord>> {
        session.run("terminal length 0")?;
        let output = session.run("show interface cable-upstream")?;
        let records = parse::parse_ccap0(device, &output);
        if self.debug_enabled(Dialect::Ccap0) {
            eprintln!("[MODSCAN-DRIVER] {device}: ccap0 parsed {} records", records.len());
        }
        Ok(records)
    }

    fn poll_ccap1(&self, session: &mut dyn DeviceSession, device: &str) -> Result<Vec<ModulationRecord>> {
        session.run("page-off")?;

        // Bulk path first: one command covers every upstream.
        let bulk = session.run("show spectrum hop-history").unwrap_or_default();
        if !bulk.trim().is_empty() {
            let records = parse::parse_ccap1_bulk(device, &bulk);
            if self.debug_enabled(Dialect::Ccap1) {
                eprintln!(
                    "[MODSCAN-DRIVER] {device}: ccap1 bulk parsed {} records",
                    records.len()
                );
            }
            return Ok(records);
        }

        // Fallback: walk interfaces individually.
        eprintln!("[MODSCAN-DRIVER] {device}: bulk spectrum output empty, falling back to per-interface scan");
        let summary = session.run("show cable modem sum")?;
        let mut interfaces = parse::parse_modem_summary_interfaces(&summary, Some(9));
        if interfaces.len() > CCAP1_FALLBACK_MAX_INTERFACES {
            eprintln!(
                "[MODSCAN-DRIVER] {device}: limiting fallback to {CCAP1_FALLBACK_MAX_INTERFACES} of {} interfaces",
                interfaces.len()
            );
            interfaces.truncate(CCAP1_FALLBACK_MAX_INTERFACES);
        }

        let mut records = Vec::new();
        for interface in &interfaces {
            let command = format!("show spectrum hop-history upstream {interface}");
            match session.run(&command) {
                Ok(output) => {
                    if let Some(record) = parse::parse_ccap1_hop_history(device, interface, &output)
                    {
                        records.push(record);
                    }
                }
                // One slow or broken interface must not sink the rest.
                Err(err) => {
                    eprintln!("[MODSCAN-DRIVER] {device}: interface {interface} failed: {err}");
                }
            }
        }
        Ok(records)
    }

    fn poll_ccap2(&self, session: &mut dyn DeviceSession, device: &str) -> Result<Vec<ModulationRecord>> {
        session.run("term length 0")?;
        let summary = session.run("show cable modem sum")?;
        let interfaces = parse::parse_modem_summary_interfaces(&summary, None);
        if interfaces.is_empty() {
            // A device with no modems online is normal, not a failure.
            return Ok(Vec::new());
        }

        let bases = parse::base_interfaces(&interfaces);
        if self.debug_enabled(Dialect::Ccap2) {
            eprintln!(
                "[MODSCAN-DRIVER] {device}: ccap2 found {} base interfaces",
                bases.len()
            );
        }

        let mut records = Vec::new();
        for base in &bases {
            let command =
                format!("show controller c{base} Upstream | i Profile|Upstream|US|up|UP");
            match session.run(&command) {
                Ok(output) => {
                    records.extend(parse::parse_ccap2_controller(device, base, &output));
                }
                Err(err) => {
                    eprintln!("[MODSCAN-DRIVER] {device}: controller {base} failed: {err}");
                }
            }
        }
        Ok(records)
    }
}

impl DeviceDriver for TextCommandDriver {
    fn poll(&self, device: &str) -> Result<Vec<ModulationRecord>> {
        let Some(dialect) = Dialect::for_device(device) else {
            // Unknown hostname shapes are skipped, not failed: the directory
            // filter should have caught them, and erroring would re-log the
            // same device every interval.
            eprintln!("[MODSCAN-DRIVER] unknown device dialect for {device}, skipping");
            return Ok(Vec::new());
        };

        let mut session = self.transport.connect(device)?;
        match dialect {
            Dialect::Ccap0 => self.poll_ccap0(session.as_mut(), device),
            Dialect::Ccap1 => self.poll_ccap1(session.as_mut(), device),
            Dialect::Ccap2 => self.poll_ccap2(session.as_mut(), device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ScanError;
    use parking_lot::Mutex;

    #[test]
    fn dialect_routing_follows_hostname_series() {
        assert_eq!(Dialect::for_device("CCAP001"), Some(Dialect::Ccap0));
        assert_eq!(Dialect::for_device("CCAP142"), Some(Dialect::Ccap1));
        assert_eq!(Dialect::for_device("CCAP203"), Some(Dialect::Ccap2));
        assert_eq!(Dialect::for_device("CCAP901"), None);
        assert_eq!(Dialect::for_device("EDGE001"), None);
    }

    /// Scripted transport: maps commands to canned outputs, records calls.
    struct ScriptedTransport {
        responses: Vec<(&'static str, &'static str)>,
        commands_seen: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedSession {
        responses: Vec<(&'static str, &'static str)>,
        commands_seen: Arc<Mutex<Vec<String>>>,
    }

    impl CommandTransport for ScriptedTransport {
        fn connect(&self, _device: &str) -> Result<Box<dyn DeviceSession>> {
            Ok(Box::new(ScriptedSession {
                responses: self.responses.clone(),
                commands_seen: Arc::clone(&self.commands_seen),
            }))
        }
    }

    impl DeviceSession for ScriptedSession {
        fn run(&mut self, command: &str) -> Result<String> {
            self.commands_seen.lock().push(command.to_string());
            for (prefix, output) in &self.responses {
                if command.starts_with(prefix) {
                    return Ok((*output).to_string());
                }
            }
            Ok(String::new())
        }
    }

    struct RefusingTransport;

    impl CommandTransport for RefusingTransport {
        fn connect(&self, device: &str) -> Result<Box<dyn DeviceSession>> {
            Err(ScanError::device(device, "connection refused"))
        }
    }

    #[test]
    fn ccap0_flow_sets_terminal_then_parses() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            responses: vec![(
                "show interface cable-upstream",
                "1/2.3/0 u0 IS 1 24.0 6.4 0.0 33 atdma 202\n",
            )],
            commands_seen: Arc::clone(&seen),
        };
        let driver = TextCommandDriver::new(Arc::new(transport), &[]);

        let records = driver.poll("CCAP001").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            seen.lock().as_slice(),
            ["terminal length 0", "show interface cable-upstream"]
        );
    }

    #[test]
    fn ccap1_prefers_bulk_and_skips_fallback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            responses: vec![(
                "show spectrum hop-history",
                "4/15.3/0 2024-01-05 10:11:00 M change noise 33 0.0 222 202\n",
            )],
            commands_seen: Arc::clone(&seen),
        };
        let driver = TextCommandDriver::new(Arc::new(transport), &[]);

        let records = driver.poll("CCAP100").unwrap();
        assert_eq!(records.len(), 1);
        let commands = seen.lock();
        assert!(!commands.iter().any(|c| c.contains("cable modem sum")));
    }

    #[test]
    fn ccap1_empty_bulk_walks_interfaces() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            responses: vec![
                ("show spectrum hop-history upstream",
                 "1/2.3/UB 2024-01-05 10:11:00 M change noise 33 0.0 226\n"),
                ("show cable modem sum", "C1/2.3/UB 120 118\n"),
            ],
            commands_seen: Arc::clone(&seen),
        };
        let driver = TextCommandDriver::new(Arc::new(transport), &[]);

        let records = driver.poll("CCAP100").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].upstream, "1/2.3/UB");
    }

    #[test]
    fn ccap2_with_no_interfaces_returns_empty() {
        let transport = ScriptedTransport {
            responses: vec![("show cable modem sum", "no CM online\n")],
            commands_seen: Arc::new(Mutex::new(Vec::new())),
        };
        let driver = TextCommandDriver::new(Arc::new(transport), &[]);
        assert!(driver.poll("CCAP200").unwrap().is_empty());
    }

    #[test]
    fn unknown_dialect_skips_without_error() {
        let driver = TextCommandDriver::new(Arc::new(RefusingTransport), &[]);
        assert!(driver.poll("EDGE001").unwrap().is_empty());
    }

    #[test]
    fn connect_failure_is_a_device_error() {
        let driver = TextCommandDriver::new(Arc::new(RefusingTransport), &[]);
        let err = driver.poll("CCAP001").unwrap_err();
        assert_eq!(err.code(), "MS-3001");
    }
}
