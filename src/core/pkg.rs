/// Package manager integration
///
/// Thin wrapper over apt-get install/remove primitives. The installer only
/// tracks which operations were attempted successfully; package state itself
/// lives on the host.

use std::sync::Arc;

use crate::core::error::InstallError;
use crate::core::runner::CommandRunner;

pub struct PackageManager {
    runner: Arc<dyn CommandRunner>,
}

impl PackageManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Refresh the package index.
    pub fn update_index(&self) -> Result<(), InstallError> {
        self.runner.run("apt-get", &["update", "-q"])?;
        Ok(())
    }

    /// Install the given packages, skipping any that are already present.
    ///
    /// Returns the names that were actually installed.
    pub fn install(&self, packages: &[&str]) -> Result<Vec<String>, InstallError> {
        let missing: Vec<&str> = packages
            .iter()
            .copied()
            .filter(|pkg| !self.is_installed(pkg))
            .collect();

        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["install", "-y", "-q"];
        args.extend(missing.iter());
        self.runner.run("apt-get", &args)?;

        // Verify the install actually landed
        for pkg in &missing {
            if !self.is_installed(pkg) {
                return Err(InstallError::MissingPrerequisite(format!(
                    "package {} not present after install",
                    pkg
                )));
            }
        }

        Ok(missing.into_iter().map(String::from).collect())
    }

    /// Remove the given packages, ignoring ones that are not installed.
    pub fn remove(&self, packages: &[&str]) -> Result<(), InstallError> {
        let present: Vec<&str> = packages
            .iter()
            .copied()
            .filter(|pkg| self.is_installed(pkg))
            .collect();

        if present.is_empty() {
            return Ok(());
        }

        let mut args = vec!["remove", "-y", "-q"];
        args.extend(present.iter());
        self.runner.run("apt-get", &args)?;
        Ok(())
    }

    /// Check whether a package is installed via dpkg-query.
    pub fn is_installed(&self, package: &str) -> bool {
        self.runner.probe(
            "dpkg-query",
            &["-W", "--showformat=${db:Status-Status}", package],
        )
    }
}
