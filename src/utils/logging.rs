/// Per-run log file setup
///
/// Every run writes a timestamped append-only log file and mirrors the same
/// records to the console. The timestamp in the filename keeps runs from
/// overwriting each other.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directory holding run logs: `<state dir>/atlas-cli/logs`.
pub fn log_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .context("Could not determine state directory")?;
    Ok(base.join("atlas-cli").join("logs"))
}

/// Filename for one run, timestamp embedded.
pub fn run_log_filename(command: &str, stamp: &str) -> String {
    format!("atlas-{}-{}.log", command, stamp)
}

/// Install the global subscriber: console layer plus per-run file layer.
///
/// Returns the path of the run log so it can be surfaced to the user.
pub fn init_run_logging(command: &str) -> Result<PathBuf> {
    let dir = log_dir()?;
    fs::create_dir_all(&dir).context("Failed to create log directory")?;

    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let path = dir.join(run_log_filename(command, &stamp));
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open run log at {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(path)
}
