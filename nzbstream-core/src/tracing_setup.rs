//! Logging for the nzbstream server and CLI.
//!
//! The console shows acquisitions at the level picked with `--log-level`.
//! `<logs_dir>/nzbstream-last-run.log` keeps lock, poll and proxy events from
//! nzbstream's own crates at trace so a stuck stream can be followed after
//! the fact; third-party crates are capped at debug there.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const RUN_LOG: &str = "nzbstream-last-run.log";
const RUN_LOG_DIRECTIVES: &str = "debug,nzbstream_core=trace,nzbstream_web=trace,nzbstream=trace";

/// Installs the global subscriber for a `serve` or one-shot CLI run.
///
/// `RUST_LOG` replaces `console_level` for the console when set. The run log
/// lands in `logs_dir` (`./logs` when `None`) and is truncated on start.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - Log directory or run log could not be created
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let run_log = run_log_path(logs_dir);
    if let Some(dir) = run_log.parent() {
        create_dir_all(dir)?;
    }
    let log_file = File::create(&run_log)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter(console_level));

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_filter(EnvFilter::new(RUN_LOG_DIRECTIVES));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        console = %console_level,
        run_log = %run_log.display(),
        "Logging started"
    );

    Ok(())
}

fn run_log_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir.unwrap_or_else(|| Path::new("logs")).join(RUN_LOG)
}

fn console_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Console verbosity selectable with `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Acquisition milestones (default)
    Info,
    /// Lock, poll and resolver decisions
    Debug,
    /// Every store round trip and upstream request
    Trace,
}

impl CliLogLevel {
    /// Level handed to [`init_tracing`] for the console.
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
