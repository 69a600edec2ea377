/// Helper utilities for the Atlas CLI

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::PathBuf;

use crate::utils::constants::COMPOSE_FILE;
use crate::utils::AppConfig;

/// Get the install root directory (where docker-compose.yml is located)
///
/// Resolution order: saved configuration, ATLAS_INSTALL_ROOT environment
/// variable, walking up from the current directory, the packaged default.
/// The default is returned even when nothing exists there yet, because the
/// installer is the one that creates it.
pub fn find_install_root() -> Result<PathBuf> {
    // 1. Check saved configuration
    if let Ok(config) = AppConfig::load() {
        if let Some(root) = config.install_root {
            let path = PathBuf::from(&root);
            if path.join(COMPOSE_FILE).exists() {
                return Ok(path);
            }
        }
    }

    // 2. Check environment variable
    if let Ok(root) = std::env::var("ATLAS_INSTALL_ROOT") {
        let path = PathBuf::from(root);
        if let Ok(mut config) = AppConfig::load() {
            let _ = config.set_install_root(path.clone());
        }
        return Ok(path);
    }

    // 3. Search for docker-compose.yml in current and parent directories
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;
    let mut dir = current_dir.as_path();
    loop {
        if dir.join(COMPOSE_FILE).exists() {
            if let Ok(mut config) = AppConfig::load() {
                let _ = config.set_install_root(dir.to_path_buf());
            }
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }

    // 4. Fall back to the packaged default
    Ok(PathBuf::from(crate::utils::constants::DEFAULT_INSTALL_ROOT))
}

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format duration to human-readable string
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format timestamp to human-readable string
pub fn format_timestamp(timestamp: i64) -> String {
    let dt = DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap());
    let local: DateTime<Local> = dt.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    if value.len() <= visible_chars * 2 {
        "*".repeat(value.len())
    } else {
        let start = &value[..visible_chars];
        let end = &value[value.len() - visible_chars..];
        format!("{}...{}", start, end)
    }
}

/// Generate a random hex string of specified length
pub fn generate_hex_string(length: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| format!("{:x}", rng.gen::<u8>() % 16))
        .collect()
}

/// Validate hex string
pub fn is_valid_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse Docker container status to simplified state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    Restarting,
    Dead,
    Unknown,
}

impl From<&str> for ContainerState {
    fn from(status: &str) -> Self {
        let status_lower = status.to_lowercase();
        if status_lower.contains("up") || status_lower.contains("running") {
            ContainerState::Running
        } else if status_lower.contains("paused") {
            ContainerState::Paused
        } else if status_lower.contains("restarting") {
            ContainerState::Restarting
        } else if status_lower.contains("dead") || status_lower.contains("removing") {
            ContainerState::Dead
        } else if status_lower.contains("exited") || status_lower.contains("stopped") {
            ContainerState::Stopped
        } else {
            ContainerState::Unknown
        }
    }
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "Running",
            ContainerState::Stopped => "Stopped",
            ContainerState::Paused => "Paused",
            ContainerState::Restarting => "Restarting",
            ContainerState::Dead => "Dead",
            ContainerState::Unknown => "Unknown",
        }
    }
}
