//! modscan — supervised modulation polling for CCAP fleets.
//!
//! A long-running daemon polls each device in the fleet for its upstream
//! modulation state on a per-device wall-clock schedule, fanning ready
//! devices out to a fixed-size worker pool and persisting the extracted
//! records. Exactly one daemon instance runs per host (advisory lock on a
//! pid file), and the daemon continuously publishes an atomically-replaced
//! health snapshot. A separate supervisor process — normally fired from
//! cron — reads that snapshot, decides liveness, and restarts a stuck or
//! crashed daemon with bounded, backed-off retries.
//!
//! Module map:
//! - [`core`]: error taxonomy (`MS-xxxx` codes) and layered configuration
//! - [`daemon`]: instance lock, health snapshots, signals, main loop
//! - [`scan`]: collaborator seams, per-device scheduler, poll cycle
//! - [`device`]: CLI dialects, parsers, SSH transport, fleet directory
//! - [`sink`]: SQLite persistence and retention maintenance
//! - [`supervisor`]: the external watchdog
//! - [`logger`]: JSONL activity log
//! - [`platform`]: process liveness probes and signal delivery

#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod daemon;
pub mod device;
pub mod logger;
pub mod platform;
pub mod scan;
pub mod sink;
pub mod supervisor;
