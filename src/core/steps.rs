/// The eight install steps
///
/// Each step checks current host state before acting, so a re-run after an
/// interrupted install does not redo finished work. A step that finds its
/// work already done records that it does not own the result, and its
/// compensation then explicitly declines to undo someone else's state.

use async_trait::async_trait;
use semver::Version;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::bundle::{BundleFetcher, BundleRelease};
use crate::core::config::{pin_compose_images, EnvConfig};
use crate::core::docker::DockerManager;
use crate::core::error::InstallError;
use crate::core::health::HealthChecker;
use crate::core::pkg::PackageManager;
use crate::core::runner::CommandRunner;
use crate::core::sequencer::{InstallStep, Step, UnwindOutcome};
use crate::core::system::KernelTuner;
use crate::utils::constants::{
    BASE_TOOLS, COMPOSE_FILE, COMPOSE_PACKAGES, DOCKER_PACKAGES, ENV_FILE,
};

/// Everything the step factory needs to wire a run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub install_root: PathBuf,
    pub bundle_version: Version,
    pub node_id: String,
    pub skip_health: bool,
}

/// Build the forward step list for `install`, in execution order.
pub fn install_steps(
    opts: &InstallOptions,
    runner: Arc<dyn CommandRunner>,
) -> Result<Vec<Box<dyn InstallStep>>, InstallError> {
    let release = BundleRelease::for_version(opts.bundle_version.clone());
    let fetcher = BundleFetcher::new(opts.install_root.clone(), runner.clone())?;

    let mut steps: Vec<Box<dyn InstallStep>> = vec![
        Box::new(ToolInstallStep::new(runner.clone())),
        Box::new(RuntimeInstallStep::new(runner.clone())),
        Box::new(OrchestratorInstallStep::new(runner.clone())),
        Box::new(KernelTuningStep::new(KernelTuner::new(runner.clone()))),
        Box::new(BundleFetchStep::new(fetcher, release)),
        Box::new(EnvConfigStep::new(
            opts.install_root.clone(),
            opts.node_id.clone(),
            opts.bundle_version.clone(),
        )),
        Box::new(StackStartStep::new(opts.install_root.clone())),
    ];

    if !opts.skip_health {
        steps.push(Box::new(HealthCheckStep::new(opts.install_root.clone())));
    }

    Ok(steps)
}

/// Build the step list for `uninstall`.
///
/// The compensations run over the full chain. Steps whose artifacts an
/// uninstall genuinely owns (stack, config, bundle, kernel drop-in) are
/// constructed as owned so their compensation fires; host-level packages
/// are left in place and say so.
pub fn uninstall_steps(
    opts: &InstallOptions,
    runner: Arc<dyn CommandRunner>,
) -> Result<Vec<Box<dyn InstallStep>>, InstallError> {
    let release = BundleRelease::for_version(opts.bundle_version.clone());
    let fetcher = BundleFetcher::new(opts.install_root.clone(), runner.clone())?;

    Ok(vec![
        Box::new(ToolInstallStep::new(runner.clone())),
        Box::new(RuntimeInstallStep::new(runner.clone())),
        Box::new(OrchestratorInstallStep::new(runner.clone())),
        Box::new(KernelTuningStep::owned(KernelTuner::new(runner.clone()))),
        Box::new(BundleFetchStep::owned(fetcher, release)),
        Box::new(EnvConfigStep::owned(
            opts.install_root.clone(),
            opts.node_id.clone(),
            opts.bundle_version.clone(),
        )),
        Box::new(StackStartStep::new(opts.install_root.clone())),
        Box::new(HealthCheckStep::new(opts.install_root.clone())),
    ])
}

/// Step 1: base tool set.
pub struct ToolInstallStep {
    pkg: PackageManager,
}

impl ToolInstallStep {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            pkg: PackageManager::new(runner),
        }
    }
}

#[async_trait]
impl InstallStep for ToolInstallStep {
    fn id(&self) -> Step {
        Step::ToolInstall
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        self.pkg.update_index()?;
        let installed = self.pkg.install(BASE_TOOLS)?;
        if installed.is_empty() {
            info!("base tools already present");
        } else {
            info!(packages = ?installed, "base tools installed");
        }
        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        UnwindOutcome::CannotUndo("base tools are shared with the host; leaving in place")
    }
}

/// Step 2: container runtime.
pub struct RuntimeInstallStep {
    pkg: PackageManager,
    runner: Arc<dyn CommandRunner>,
    installed_by_us: bool,
}

impl RuntimeInstallStep {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            pkg: PackageManager::new(runner.clone()),
            runner,
            installed_by_us: false,
        }
    }

    fn daemon_answers(&self) -> bool {
        self.runner.probe("docker", &["info"])
    }
}

#[async_trait]
impl InstallStep for RuntimeInstallStep {
    fn id(&self) -> Step {
        Step::RuntimeInstall
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        if self.daemon_answers() {
            info!("docker daemon already answering; skipping runtime install");
            return Ok(());
        }

        self.pkg.install(DOCKER_PACKAGES)?;
        self.installed_by_us = true;

        // The package postinst usually starts the daemon; nudge it if not.
        if !self.daemon_answers() {
            let _ = self.runner.run("systemctl", &["enable", "--now", "docker"]);
        }
        if !self.daemon_answers() {
            return Err(InstallError::MissingPrerequisite(
                "docker daemon not reachable after install".to_string(),
            ));
        }

        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        if !self.installed_by_us {
            return UnwindOutcome::CannotUndo(
                "container runtime pre-dates this run; leaving in place",
            );
        }
        match self.pkg.remove(DOCKER_PACKAGES) {
            Ok(()) => UnwindOutcome::Undone,
            Err(err) => UnwindOutcome::Failed(err.into()),
        }
    }
}

/// Step 3: compose plugin.
pub struct OrchestratorInstallStep {
    pkg: PackageManager,
    runner: Arc<dyn CommandRunner>,
    installed_by_us: bool,
}

impl OrchestratorInstallStep {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            pkg: PackageManager::new(runner.clone()),
            runner,
            installed_by_us: false,
        }
    }

    fn compose_available(&self) -> bool {
        self.runner.probe("docker", &["compose", "version"])
    }
}

#[async_trait]
impl InstallStep for OrchestratorInstallStep {
    fn id(&self) -> Step {
        Step::OrchestratorInstall
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        if self.compose_available() {
            info!("docker compose already available; skipping");
            return Ok(());
        }

        self.pkg.install(COMPOSE_PACKAGES)?;
        self.installed_by_us = true;

        if !self.compose_available() {
            return Err(InstallError::MissingPrerequisite(
                "docker compose not available after install".to_string(),
            ));
        }

        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        if !self.installed_by_us {
            return UnwindOutcome::CannotUndo(
                "compose plugin pre-dates this run; leaving in place",
            );
        }
        match self.pkg.remove(COMPOSE_PACKAGES) {
            Ok(()) => UnwindOutcome::Undone,
            Err(err) => UnwindOutcome::Failed(err.into()),
        }
    }
}

/// Step 4: kernel parameters.
pub struct KernelTuningStep {
    tuner: KernelTuner,
    wrote_dropin: bool,
}

impl KernelTuningStep {
    pub fn new(tuner: KernelTuner) -> Self {
        Self {
            tuner,
            wrote_dropin: false,
        }
    }

    /// Uninstall constructor: the drop-in belongs to this stack, revert it.
    pub fn owned(tuner: KernelTuner) -> Self {
        Self {
            tuner,
            wrote_dropin: true,
        }
    }
}

#[async_trait]
impl InstallStep for KernelTuningStep {
    fn id(&self) -> Step {
        Step::KernelTuning
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        if self.tuner.is_applied() {
            info!("sysctl drop-in already present; skipping");
            return Ok(());
        }
        self.tuner.apply()?;
        self.wrote_dropin = true;
        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        if !self.wrote_dropin {
            return UnwindOutcome::CannotUndo("sysctl drop-in pre-dates this run; leaving in place");
        }
        match self.tuner.revert() {
            Ok(()) => UnwindOutcome::Undone,
            Err(err) => UnwindOutcome::Failed(err.into()),
        }
    }
}

/// Step 5: release bundle.
pub struct BundleFetchStep {
    fetcher: BundleFetcher,
    release: BundleRelease,
    extracted_by_us: bool,
}

impl BundleFetchStep {
    pub fn new(fetcher: BundleFetcher, release: BundleRelease) -> Self {
        Self {
            fetcher,
            release,
            extracted_by_us: false,
        }
    }

    /// Uninstall constructor: the bundle tree belongs to this stack.
    pub fn owned(fetcher: BundleFetcher, release: BundleRelease) -> Self {
        Self {
            fetcher,
            release,
            extracted_by_us: true,
        }
    }
}

#[async_trait]
impl InstallStep for BundleFetchStep {
    fn id(&self) -> Step {
        Step::BundleFetch
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        let compose = self.fetcher.install_root().join(COMPOSE_FILE);
        if compose.exists() {
            info!(
                root = %self.fetcher.install_root().display(),
                "bundle already extracted; skipping fetch"
            );
            return Ok(());
        }

        let archive = self.fetcher.download(&self.release).await?;
        let result = self.fetcher.extract(&archive);
        self.fetcher.discard_archive(&archive);
        result?;
        self.extracted_by_us = true;
        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        if !self.extracted_by_us {
            return UnwindOutcome::CannotUndo(
                "bundle directory pre-dates this run; leaving in place",
            );
        }
        match self.fetcher.remove_install_tree() {
            Ok(()) => UnwindOutcome::Undone,
            Err(err) => UnwindOutcome::Failed(err.into()),
        }
    }
}

/// Step 6: stack configuration.
pub struct EnvConfigStep {
    install_root: PathBuf,
    node_id: String,
    bundle_version: Version,
    created_env: bool,
}

impl EnvConfigStep {
    pub fn new(install_root: PathBuf, node_id: String, bundle_version: Version) -> Self {
        Self {
            install_root,
            node_id,
            bundle_version,
            created_env: false,
        }
    }

    /// Uninstall constructor: the .env belongs to this stack.
    pub fn owned(install_root: PathBuf, node_id: String, bundle_version: Version) -> Self {
        Self {
            install_root,
            node_id,
            bundle_version,
            created_env: true,
        }
    }

    fn env_path(&self) -> PathBuf {
        self.install_root.join(ENV_FILE)
    }
}

#[async_trait]
impl InstallStep for EnvConfigStep {
    fn id(&self) -> Step {
        Step::EnvConfig
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        let env_path = self.env_path();
        let version = self.bundle_version.to_string();

        let config = if env_path.exists() {
            let mut config = EnvConfig::load(&env_path)?;
            let added = config.fill_missing(&self.node_id, &version);
            if !added.is_empty() {
                info!(keys = ?added, "filled missing configuration keys");
            }
            config
        } else {
            self.created_env = true;
            EnvConfig::generate(&env_path, &self.node_id, &version)
        };

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(InstallError::Other(anyhow::anyhow!(
                "configuration invalid: {}",
                errors.join("; ")
            )));
        }
        config.save()?;

        let compose = self.install_root.join(COMPOSE_FILE);
        if !compose.exists() {
            return Err(InstallError::MissingArtifact { path: compose });
        }
        let pinned = pin_compose_images(&compose, &version)?;
        info!(images = pinned, version = %version, "compose images pinned");

        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        if !self.created_env {
            return UnwindOutcome::CannotUndo(
                "pre-existing configuration preserved; not removing .env",
            );
        }
        let env_path = self.env_path();
        if env_path.exists() {
            if let Err(err) = fs::remove_file(&env_path) {
                return UnwindOutcome::Failed(err.into());
            }
        }
        UnwindOutcome::Undone
    }
}

/// Step 7: bring the stack up.
pub struct StackStartStep {
    install_root: PathBuf,
}

impl StackStartStep {
    pub fn new(install_root: PathBuf) -> Self {
        Self { install_root }
    }

    fn docker(&self) -> Result<DockerManager, InstallError> {
        DockerManager::for_root(self.install_root.clone()).map_err(InstallError::Other)
    }
}

#[async_trait]
impl InstallStep for StackStartStep {
    fn id(&self) -> Step {
        Step::StackStart
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        let docker = self.docker()?;
        docker.compose_up().await?;
        info!("stack started");
        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        let docker = match self.docker() {
            Ok(d) => d,
            Err(err) => return UnwindOutcome::Failed(err.into()),
        };
        match docker.compose_down().await {
            Ok(()) => UnwindOutcome::Undone,
            Err(err) => UnwindOutcome::Failed(err),
        }
    }
}

/// Step 8: post-start health pass.
///
/// Findings here are diagnostic: a degraded stack right after start is
/// reported loudly but does not fail the install, so the step never
/// triggers unwind.
pub struct HealthCheckStep {
    install_root: PathBuf,
}

impl HealthCheckStep {
    pub fn new(install_root: PathBuf) -> Self {
        Self { install_root }
    }
}

#[async_trait]
impl InstallStep for HealthCheckStep {
    fn id(&self) -> Step {
        Step::HealthCheck
    }

    async fn apply(&mut self) -> Result<(), InstallError> {
        let checker = match DockerManager::for_root(self.install_root.clone()) {
            Ok(docker) => HealthChecker::new(docker),
            Err(err) => {
                warn!(error = %err, "health check skipped: docker unavailable");
                return Ok(());
            }
        };

        match checker.check_all().await {
            Ok(report) => {
                for service in &report.services {
                    info!(
                        service = service.service.name,
                        status = service.status.label(),
                        detail = %service.detail,
                        "health"
                    );
                }
                if report.has_failures() {
                    let names: Vec<&str> = report
                        .failed_services()
                        .map(|s| s.service.name)
                        .collect();
                    warn!(
                        services = ?names,
                        "stack started but some services are not healthy yet; \
                         run `atlas-cli health` after they settle"
                    );
                }
            }
            Err(err) => {
                warn!(error = %err, "health check could not run");
            }
        }

        Ok(())
    }

    async fn unwind(&mut self) -> UnwindOutcome {
        UnwindOutcome::CannotUndo("health check is read-only; nothing to undo")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::MockCommandRunner;
    use tempfile::TempDir;

    fn opts(root: &TempDir) -> InstallOptions {
        InstallOptions {
            install_root: root.path().join("atlas-edge"),
            bundle_version: Version::new(1, 7, 3),
            node_id: "edge-01".to_string(),
            skip_health: false,
        }
    }

    #[test]
    fn install_step_order_matches_the_fixed_sequence() {
        let dir = TempDir::new().unwrap();
        let steps = install_steps(&opts(&dir), Arc::new(MockCommandRunner::new())).unwrap();
        let ids: Vec<Step> = steps.iter().map(|s| s.id()).collect();
        assert_eq!(ids, Step::ALL.to_vec());
    }

    #[test]
    fn skip_health_drops_only_the_final_step() {
        let dir = TempDir::new().unwrap();
        let mut o = opts(&dir);
        o.skip_health = true;
        let steps = install_steps(&o, Arc::new(MockCommandRunner::new())).unwrap();
        let ids: Vec<Step> = steps.iter().map(|s| s.id()).collect();
        assert_eq!(ids, Step::ALL[..7].to_vec());
    }

    #[test]
    fn uninstall_covers_every_step() {
        let dir = TempDir::new().unwrap();
        let steps = uninstall_steps(&opts(&dir), Arc::new(MockCommandRunner::new())).unwrap();
        let ids: Vec<Step> = steps.iter().map(|s| s.id()).collect();
        assert_eq!(ids, Step::ALL.to_vec());
    }

    #[tokio::test]
    async fn env_config_creates_and_unwinds_its_own_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("atlas-edge");
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join(COMPOSE_FILE),
            "services:\n  gateway:\n    image: ghcr.io/atlas-edge/gateway:latest\n",
        )
        .unwrap();

        let mut step = EnvConfigStep::new(root.clone(), "edge-01".into(), Version::new(1, 7, 3));
        step.apply().await.unwrap();

        assert!(root.join(ENV_FILE).exists());
        let compose = fs::read_to_string(root.join(COMPOSE_FILE)).unwrap();
        assert!(compose.contains("ghcr.io/atlas-edge/gateway:v1.7.3"));

        match step.unwind().await {
            UnwindOutcome::Undone => {}
            other => panic!("expected Undone, got {other:?}"),
        }
        assert!(!root.join(ENV_FILE).exists());
    }

    #[tokio::test]
    async fn env_config_preserves_a_preexisting_file_on_unwind() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("atlas-edge");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(COMPOSE_FILE), "services: {}\n").unwrap();
        fs::write(root.join(ENV_FILE), "ATLAS_NODE_ID=keep-me\n").unwrap();

        let mut step = EnvConfigStep::new(root.clone(), "edge-01".into(), Version::new(1, 7, 3));
        step.apply().await.unwrap();

        match step.unwind().await {
            UnwindOutcome::CannotUndo(reason) => assert!(reason.contains("pre-existing")),
            other => panic!("expected CannotUndo, got {other:?}"),
        }
        assert!(root.join(ENV_FILE).exists());
        let env = fs::read_to_string(root.join(ENV_FILE)).unwrap();
        assert!(env.contains("ATLAS_NODE_ID=keep-me"));
    }

    #[tokio::test]
    async fn bundle_fetch_skips_when_already_extracted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("atlas-edge");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(COMPOSE_FILE), "services: {}\n").unwrap();

        // no expectations registered: any download or tar call would panic
        let fetcher =
            BundleFetcher::new(root.clone(), Arc::new(MockCommandRunner::new())).unwrap();
        let mut step = BundleFetchStep::new(fetcher, BundleRelease::for_version(Version::new(1, 7, 3)));
        step.apply().await.unwrap();

        // and the pre-existing tree is not ours to delete
        match step.unwind().await {
            UnwindOutcome::CannotUndo(reason) => assert!(reason.contains("pre-dates")),
            other => panic!("expected CannotUndo, got {other:?}"),
        }
        assert!(root.join(COMPOSE_FILE).exists());
    }

    #[tokio::test]
    async fn tool_install_never_offers_compensation() {
        let mut runner = MockCommandRunner::new();
        runner.expect_probe().return_const(true);
        runner
            .expect_run()
            .withf(|p, a| p == "apt-get" && a.contains(&"update"))
            .returning(|_, _| Ok(String::new()));

        let mut step = ToolInstallStep::new(Arc::new(runner));
        step.apply().await.unwrap();
        match step.unwind().await {
            UnwindOutcome::CannotUndo(reason) => assert!(reason.contains("shared")),
            other => panic!("expected CannotUndo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn runtime_install_skips_and_declines_unwind_when_daemon_present() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_probe()
            .withf(|p, a| p == "docker" && a == ["info"])
            .return_const(true);

        let mut step = RuntimeInstallStep::new(Arc::new(runner));
        step.apply().await.unwrap();
        match step.unwind().await {
            UnwindOutcome::CannotUndo(reason) => assert!(reason.contains("pre-dates")),
            other => panic!("expected CannotUndo, got {other:?}"),
        }
    }
}
