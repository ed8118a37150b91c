//! # Exposure Sync Service Binary
//!
//! Runs the exposure synchronization engine with a line-based operator
//! console on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Simulated bench, defaults if the config file is missing
//! exsync --simulate
//!
//! # Explicit configuration, verbose JSON logs
//! exsync --config /etc/exsync/exsync.toml -v --json
//!
//! # Print effective configuration and persisted state, then exit
//! exsync --config /etc/exsync/exsync.toml --status-json
//! ```

#![deny(warnings)]

use clap::Parser;
use exsync_common::clock::{Clock, SystemClock};
use exsync_common::config::{ConfigError, LogLevel, SyncConfig};
use exsync_hal::format_elapsed;
use exsync_hal::persistence::ExposureFile;
use exsync_sequencer::{Command, CommandDispatcher, CommandReply, SyncService};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exposure Sync - X-ray generator and camera synchronization service
#[derive(Parser, Debug)]
#[command(name = "exsync")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Synchronizes X-ray generator and camera exposures over digital lines")]
#[command(long_about = None)]
struct Args {
    /// Path to the service configuration file.
    #[arg(short, long, default_value = "/etc/exsync/exsync.toml")]
    config: PathBuf,

    /// Run on the simulated bench; a missing config file yields defaults.
    #[arg(short = 's', long)]
    simulate: bool,

    /// Override the persisted last-exposure file.
    #[arg(long, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Print effective configuration and persisted state as JSON, then exit
    #[arg(long)]
    status_json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("exsync failed: {}", e);
        eprintln!("exsync: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_config(&args);
    let log_level = loaded
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);
    let mut config = loaded?;
    if let Some(state_file) = &args.state_file {
        config.persistence.state_file = state_file.clone();
    }

    if args.status_json {
        return print_status_json(&config);
    }

    info!("Exposure Sync v{} starting...", env!("CARGO_PKG_VERSION"));
    if args.simulate {
        info!("Simulation mode enabled (exclusive)");
        config.lines.driver = "simulation".to_string();
    } else if config.lines.driver == "simulation" {
        warn!("Configured driver is 'simulation'; no hardware will be driven");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (mut service, _sim) = SyncService::simulated(config, clock)?;
    service.start()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let abort = Arc::clone(service.abort_controller());
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            abort.request_abort();
            running.store(false, Ordering::SeqCst);
        })?;
    }

    spawn_console(Arc::clone(service.dispatcher()), Arc::clone(&running))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    service.shutdown()?;
    info!("Exposure Sync shutdown complete");
    Ok(())
}

/// Load and validate the configuration file.
///
/// With `--simulate`, a missing file falls back to defaults.
fn load_config(args: &Args) -> Result<SyncConfig, ConfigError> {
    match SyncConfig::load_validated(&args.config) {
        Err(ConfigError::FileNotFound) if args.simulate => Ok(SyncConfig::default()),
        other => other,
    }
}

fn print_status_json(config: &SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    let path = &config.persistence.state_file;
    let persisted = match ExposureFile::new(path).load() {
        Ok(record) => record,
        Err(e) => {
            warn!("Persisted state unreadable: {e}");
            None
        }
    };
    let last_ms = persisted.as_ref().map(|r| r.last_exposure_unix_ms);
    let idle = persisted.as_ref().and_then(|r| {
        SystemTime::now()
            .duration_since(r.last_exposure())
            .ok()
            .map(format_elapsed)
    });
    let status = serde_json::json!({
        "config": config,
        "state_file": path,
        "last_exposure_unix_ms": last_ms,
        "time_since_last_exposure": idle,
        "now_unix_ms": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Read operator words from stdin and dispatch them.
fn spawn_console(
    dispatcher: Arc<CommandDispatcher>,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("exsync-console".to_string())
        .spawn(move || {
            info!("Console ready ({})", Command::USAGE);
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let word = line.trim();
                match word {
                    "" => continue,
                    "quit" | "exit" => {
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    "help" => {
                        println!("{}", Command::USAGE);
                        continue;
                    }
                    _ => {}
                }
                match word.parse::<Command>() {
                    Ok(Command::Status) => match dispatcher.execute(Command::Status) {
                        Ok(CommandReply::Status(snapshot)) => {
                            match serde_json::to_string(&snapshot) {
                                Ok(text) => println!("{text}"),
                                Err(e) => warn!("Status encoding failed: {e}"),
                            }
                        }
                        Ok(CommandReply::Done) => {}
                        Err(e) => warn!("Status failed: {e}"),
                    },
                    Ok(command) => {
                        if let Err(e) = dispatcher.dispatch(command) {
                            error!("Could not start {command}: {e}");
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            info!("Console closed");
        })?;
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let filter = if args.verbose {
        filter.add_directive(Level::DEBUG.into())
    } else {
        filter
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
