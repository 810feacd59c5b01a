//! Top-level CLI definition and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;

use crate::core::config::Config;
use crate::core::errors::{Result, ScanError};
use crate::daemon::health::HealthSnapshot;
use crate::daemon::loop_main::{DaemonDeps, ScannerDaemon};
use crate::device::directory::FileDirectory;
use crate::device::driver::TextCommandDriver;
use crate::device::transport::SshTransport;
use crate::logger::ActivityLoggerHandle;
use crate::scan::cycle::PollCycle;
use crate::scan::{DeviceDirectory, MaintenanceHook, RecordSink};
use crate::sink::sqlite::SqliteSink;
use crate::supervisor::Supervisor;

/// modscan — supervised modulation polling for CCAP fleets.
#[derive(Parser)]
#[command(name = "modscan", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the polling daemon in the foreground until signaled.
    Daemon,
    /// Watchdog operations against the daemon (default: check-and-recover).
    Supervisor {
        #[command(subcommand)]
        mode: Option<SupervisorMode>,
    },
    /// Print the daemon's health snapshot.
    Status {
        /// Emit the raw snapshot JSON instead of the summary.
        #[arg(long)]
        json: bool,
    },
    /// One-shot scan of every directory device, ignoring the scheduler.
    Scan,
    /// Show the effective configuration.
    Config,
    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supervisor invocation modes.
#[derive(Subcommand, Clone, Copy)]
pub enum SupervisorMode {
    /// Check liveness and restart the daemon if needed.
    Check,
    /// Read and report the snapshot without acting.
    Status,
    /// Start a daemon (fails if one is already live).
    Start,
    /// Stop the running daemon, escalating after the grace period.
    Stop,
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Daemon => run_daemon(config),
        Command::Supervisor { mode } => {
            run_supervisor(config, (*mode).unwrap_or(SupervisorMode::Check))
        }
        Command::Status { json } => print_status(&config, *json),
        Command::Scan => run_oneshot_scan(&config),
        Command::Config => print_config(&config),
        Command::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "modscan",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

/// Exit code for a failed dispatch: lock contention and restart exhaustion
/// get distinct codes for cron and alerting to key on.
#[must_use]
pub fn exit_code(err: &ScanError) -> i32 {
    match err {
        ScanError::AlreadyRunning { .. } => 1,
        ScanError::RestartExhausted { .. } => 2,
        _ => 1,
    }
}

struct BuiltDeps {
    deps: DaemonDeps,
    directory: Arc<dyn DeviceDirectory>,
}

fn build_deps(config: &Config) -> Result<BuiltDeps> {
    let transport = SshTransport::default().shared();
    let driver = Arc::new(TextCommandDriver::new(
        transport,
        &config.poller.debug_dialects,
    ));
    let directory: Arc<dyn DeviceDirectory> = Arc::new(FileDirectory::new(
        config.paths.device_list.clone(),
        &config.poller.device_pattern,
    )?);
    let sink = Arc::new(SqliteSink::open(
        &config.paths.database,
        config.retention.clone(),
    )?);
    let record_sink: Arc<dyn RecordSink> = sink.clone();
    let maintenance: Arc<dyn MaintenanceHook> = sink;

    Ok(BuiltDeps {
        deps: DaemonDeps {
            driver,
            directory: Arc::clone(&directory),
            sink: record_sink,
            maintenance: Some(maintenance),
        },
        directory,
    })
}

fn run_daemon(config: Config) -> Result<()> {
    let built = build_deps(&config)?;
    let mut daemon = ScannerDaemon::init(config, built.deps)?;
    daemon.run()
}

fn run_supervisor(config: Config, mode: SupervisorMode) -> Result<()> {
    match mode {
        SupervisorMode::Check => Supervisor::new(config).check_and_recover(),
        SupervisorMode::Status => print_status(&config, false),
        SupervisorMode::Start => {
            let pid = Supervisor::new(config).force_start()?;
            println!("scanner started (pid {pid})");
            Ok(())
        }
        SupervisorMode::Stop => Supervisor::new(config).force_stop(),
    }
}

fn print_status(config: &Config, json: bool) -> Result<()> {
    let path = &config.paths.status_file;
    if json {
        let raw = std::fs::read_to_string(path).map_err(|source| ScanError::io(path, source))?;
        println!("{raw}");
        return Ok(());
    }

    let probe = Supervisor::new(config.clone()).probe();
    if probe.live {
        println!("{} scanner is {}", "●".green(), "RUNNING".green().bold());
    } else {
        println!("{} scanner is {}", "●".red(), "NOT RUNNING".red().bold());
        println!("  reason: {}", probe.reason);
    }

    let Ok(snapshot) = HealthSnapshot::read(path) else {
        return Ok(());
    };
    if let Some(pid) = snapshot.pid {
        println!("  pid: {pid}");
    }
    if let Some(status) = &snapshot.status {
        println!("  status: {status} ({})", snapshot.message);
    }
    if !snapshot.uptime_human.is_empty() {
        println!("  uptime: {}", snapshot.uptime_human);
    }
    if let Some(age) = probe.heartbeat_age_secs {
        println!("  last heartbeat: {age:.0}s ago");
    }
    if let Some(last) = snapshot.last_successful_scan {
        println!("  last successful cycle: {last}");
    }
    let stats = &snapshot.statistics;
    println!(
        "  cycles: {} total, {} ok, {} failed; {} devices, {} records; avg {:.1}s",
        stats.total_cycles,
        stats.successful_cycles,
        stats.failed_cycles,
        stats.devices_processed,
        stats.records_stored,
        stats.average_cycle_secs,
    );
    Ok(())
}

fn run_oneshot_scan(config: &Config) -> Result<()> {
    let built = build_deps(config)?;
    let devices = built.directory.list_devices()?;
    if devices.is_empty() {
        println!("no devices in the directory match the configured pattern");
        return Ok(());
    }
    println!("scanning {} devices...", devices.len());

    let mut cycle = PollCycle::new(
        built.deps.driver,
        built.deps.sink,
        config.poller.pool_size,
        ActivityLoggerHandle::disabled(),
    );
    let outcome = cycle.run(devices, &mut |device, done, total| {
        eprintln!("[MODSCAN-SCAN] {done}/{total} {device}");
    })?;

    println!(
        "scan complete: {} devices processed, {} records stored, {} failed",
        outcome.devices_processed,
        outcome.records_stored,
        outcome.failed_devices.len(),
    );
    for device in &outcome.failed_devices {
        println!("  {} {device}", "failed:".red());
    }
    Ok(())
}

fn print_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).map_err(|err| ScanError::Serialization {
        context: "toml",
        details: err.to_string(),
    })?;
    print!("{rendered}");
    Ok(())
}
