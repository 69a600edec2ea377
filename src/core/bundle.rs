/// Release bundle download and extraction
///
/// Fetches the versioned Atlas Edge archive and unpacks it into the install
/// root. Extraction shells out to tar; verification only checks that the
/// artifacts the later steps depend on actually exist.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use semver::Version;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::error::InstallError;
use crate::core::runner::CommandRunner;
use crate::utils::constants::{BUNDLE_URL_TEMPLATE, COMPOSE_FILE};

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A resolved release of the orchestration bundle.
#[derive(Debug, Clone)]
pub struct BundleRelease {
    pub version: Version,
    pub archive_name: String,
    pub url: String,
}

impl BundleRelease {
    pub fn for_version(version: Version) -> Self {
        let url = BUNDLE_URL_TEMPLATE.replace("{version}", &version.to_string());
        let archive_name = format!("atlas-edge-v{}.tar.gz", version);
        Self {
            version,
            archive_name,
            url,
        }
    }
}

pub struct BundleFetcher {
    client: reqwest::Client,
    install_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl BundleFetcher {
    pub fn new(install_root: PathBuf, runner: Arc<dyn CommandRunner>) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("atlas-cli/{}", CURRENT_VERSION))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| InstallError::Download(e.to_string()))?;

        Ok(Self {
            client,
            install_root,
            runner,
        })
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Download the release archive into the system temp directory.
    pub async fn download(&self, release: &BundleRelease) -> Result<PathBuf, InstallError> {
        let dest = std::env::temp_dir().join(&release.archive_name);

        let response = self
            .client
            .get(&release.url)
            .send()
            .await
            .map_err(|e| InstallError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(InstallError::Download(format!(
                "HTTP {} fetching {}",
                response.status(),
                release.url
            )));
        }

        let bar = match response.content_length() {
            Some(total) => {
                let style = ProgressStyle::with_template(
                    "{bar:30.cyan/dim} {bytes}/{total_bytes} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                ProgressBar::new(total).with_style(style)
            }
            None => ProgressBar::new_spinner(),
        };

        let mut file = File::create(&dest)?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::Download(e.to_string()))?;
            file.write_all(&chunk)?;
            bar.inc(chunk.len() as u64);
        }
        bar.finish_and_clear();

        info!(archive = %dest.display(), version = %release.version, "bundle downloaded");
        Ok(dest)
    }

    /// Unpack an archive into the install root and verify the compose file
    /// is present afterwards.
    pub fn extract(&self, archive: &Path) -> Result<(), InstallError> {
        fs::create_dir_all(&self.install_root)?;

        let archive_str = archive.to_string_lossy();
        let root_str = self.install_root.to_string_lossy();
        self.runner.run(
            "tar",
            &[
                "-xzf",
                archive_str.as_ref(),
                "-C",
                root_str.as_ref(),
                "--strip-components=1",
            ],
        )?;

        let compose = self.install_root.join(COMPOSE_FILE);
        if !compose.exists() {
            return Err(InstallError::MissingArtifact { path: compose });
        }

        info!(root = %self.install_root.display(), "bundle extracted");
        Ok(())
    }

    /// Remove a downloaded archive; failure here is not worth surfacing.
    pub fn discard_archive(&self, archive: &Path) {
        let _ = fs::remove_file(archive);
    }

    /// Delete the extracted bundle tree (bundle-fetch compensation).
    pub fn remove_install_tree(&self) -> Result<(), InstallError> {
        if self.install_root.exists() {
            fs::remove_dir_all(&self.install_root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::MockCommandRunner;
    use tempfile::TempDir;

    #[test]
    fn release_url_substitutes_version() {
        let release = BundleRelease::for_version(Version::new(1, 7, 3));
        assert_eq!(release.archive_name, "atlas-edge-v1.7.3.tar.gz");
        assert!(release.url.contains("/v1.7.3/atlas-edge-v1.7.3.tar.gz"));
        assert!(!release.url.contains("{version}"));
    }

    #[test]
    fn extract_fails_when_compose_file_missing() {
        let dir = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        // tar "succeeds" but produces nothing
        runner
            .expect_run()
            .withf(|p, _| p == "tar")
            .returning(|_, _| Ok(String::new()));

        let fetcher =
            BundleFetcher::new(dir.path().join("atlas-edge"), Arc::new(runner)).unwrap();
        let err = fetcher.extract(Path::new("/tmp/bundle.tar.gz")).unwrap_err();
        match err {
            InstallError::MissingArtifact { path } => {
                assert!(path.ends_with(COMPOSE_FILE));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extract_succeeds_when_compose_file_appears() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("atlas-edge");
        let root_clone = root.clone();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|p, _| p == "tar")
            .returning(move |_, _| {
                fs::write(root_clone.join(COMPOSE_FILE), "services: {}\n").unwrap();
                Ok(String::new())
            });

        let fetcher = BundleFetcher::new(root.clone(), Arc::new(runner)).unwrap();
        fetcher.extract(Path::new("/tmp/bundle.tar.gz")).unwrap();
        assert!(root.join(COMPOSE_FILE).exists());
    }

    #[test]
    fn remove_install_tree_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("atlas-edge");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(COMPOSE_FILE), "services: {}\n").unwrap();

        let fetcher =
            BundleFetcher::new(root.clone(), Arc::new(MockCommandRunner::new())).unwrap();
        fetcher.remove_install_tree().unwrap();
        assert!(!root.exists());
        // second call finds nothing and still succeeds
        fetcher.remove_install_tree().unwrap();
    }
}
