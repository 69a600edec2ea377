/// Error taxonomy for the installer
///
/// Forward-step failures are fatal and trigger the unwind mechanism;
/// health-classification findings are not errors and never appear here.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    /// A required tool or package could not be found or made available.
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// An external command exited with a non-zero status.
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A file the previous action was expected to produce is absent.
    #[error("expected artifact missing: {path}")]
    MissingArtifact { path: PathBuf },

    /// The release archive could not be fetched.
    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
