/// Command-execution seam
///
/// Every external collaborator (package manager, tar, sysctl) is reached
/// through this trait so the steps can be exercised without touching the
/// host in tests.

use std::process::{Command, Stdio};

use crate::core::error::InstallError;

#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and return its stdout.
    ///
    /// A non-zero exit status maps to `InstallError::CommandFailed` with the
    /// captured stderr attached.
    fn run<'a>(&self, program: &str, args: &[&'a str]) -> Result<String, InstallError>;

    /// Run a command purely to test whether it succeeds.
    fn probe<'a>(&self, program: &str, args: &[&'a str]) -> bool;
}

/// Runner backed by the real host.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&self, program: &str, args: &[&'a str]) -> Result<String, InstallError> {
        let output = Command::new(program)
            .args(args)
            // apt prompts are fatal in unattended runs
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(InstallError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn probe<'a>(&self, program: &str, args: &[&'a str]) -> bool {
        Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
