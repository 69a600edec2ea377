/// Kernel parameter tuning and host preflight
///
/// The kernel-tuning step owns exactly one file: a sysctl drop-in. Reverting
/// it removes the file and reloads, leaving the host as it was.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::info;

use crate::core::error::InstallError;
use crate::core::runner::CommandRunner;
use crate::utils::constants::{MIN_DISK_BYTES, MIN_MEMORY_BYTES, SYSCTL_DROPIN, SYSCTL_SETTINGS};
use crate::utils::format_bytes;

pub struct KernelTuner {
    dropin_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl KernelTuner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            dropin_path: PathBuf::from(SYSCTL_DROPIN),
            runner,
        }
    }

    /// Use a different drop-in location (tests).
    pub fn with_path(dropin_path: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            dropin_path,
            runner,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.dropin_path.exists()
    }

    /// Render the drop-in contents.
    pub fn render() -> String {
        let mut out = String::from("# Managed by atlas-cli; removed on uninstall\n");
        for (key, value) in SYSCTL_SETTINGS {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        out
    }

    /// Write the drop-in and reload kernel parameters.
    pub fn apply(&self) -> Result<(), InstallError> {
        if let Some(parent) = self.dropin_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.dropin_path, Self::render())?;
        self.runner.run("sysctl", &["--system"])?;
        info!(dropin = %self.dropin_path.display(), "kernel parameters applied");
        Ok(())
    }

    /// Remove the drop-in and reload (kernel-tuning compensation).
    pub fn revert(&self) -> Result<(), InstallError> {
        if self.dropin_path.exists() {
            fs::remove_file(&self.dropin_path)?;
            self.runner.run("sysctl", &["--system"])?;
        }
        Ok(())
    }
}

/// Snapshot of host resources taken before the first install step.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub total_memory: u64,
    pub available_disk: u64,
    pub cpu_count: usize,
    pub warnings: Vec<String>,
}

/// Collect host facts and compare against the stack's minimums.
///
/// Findings are warnings only; the installer proceeds regardless.
pub fn preflight() -> PreflightReport {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let total_memory = sys.total_memory();
    let cpu_count = sys.cpus().len();

    let disks = Disks::new_with_refreshed_list();
    let available_disk = disks
        .iter()
        .filter(|d| d.mount_point() == std::path::Path::new("/"))
        .map(|d| d.available_space())
        .max()
        .or_else(|| disks.iter().map(|d| d.available_space()).max())
        .unwrap_or(0);

    let mut warnings = Vec::new();
    if total_memory < MIN_MEMORY_BYTES {
        warnings.push(format!(
            "host has {} of memory; the stack expects at least {}",
            format_bytes(total_memory),
            format_bytes(MIN_MEMORY_BYTES)
        ));
    }
    if available_disk < MIN_DISK_BYTES {
        warnings.push(format!(
            "only {} of disk available; the stack expects at least {}",
            format_bytes(available_disk),
            format_bytes(MIN_DISK_BYTES)
        ));
    }

    PreflightReport {
        total_memory,
        available_disk,
        cpu_count,
        warnings,
    }
}
