/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built: ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "atlas-cli")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the Atlas Edge stack onto this host
    Install {
        /// Bundle version to install (defaults to the pinned release)
        #[arg(long)]
        bundle_version: Option<String>,

        /// Directory to extract the bundle into
        #[arg(long)]
        install_root: Option<PathBuf>,

        /// Node identifier written into the stack configuration
        #[arg(long)]
        node_id: Option<String>,

        /// Skip the post-start health pass
        #[arg(long)]
        skip_health: bool,
    },

    /// Check the health of all stack services
    Health {
        /// Emit the report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show container status and resource usage
    Status,

    /// View logs for a service
    Logs {
        /// Service name
        service: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "100")]
        tail: usize,
    },

    /// Remove the stack from this host (best-effort, reverse install order)
    Uninstall {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Stack configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// View configuration
    View,

    /// Validate configuration
    Validate,
}
