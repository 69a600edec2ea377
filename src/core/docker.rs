/// Docker and Docker Compose integration
///
/// Manages Atlas Edge containers and docker-compose operations

use anyhow::{anyhow, Context, Result};
use bollard::container::{ListContainersOptions, StatsOptions};
use bollard::models::ContainerSummary;
use bollard::Docker;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::utils::constants::{COMPOSE_FILE, COMPOSE_PROJECT};
use crate::utils::{find_install_root, ContainerState};

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: ContainerState,
    pub health: Option<String>,
    pub created: i64,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
    install_root: PathBuf,
    compose_file: PathBuf,
}

impl DockerManager {
    /// Create a manager rooted at the resolved install location.
    ///
    /// Construction does not require the compose file to exist yet; compose
    /// operations check for it themselves. This matters during install,
    /// where the bundle-fetch step is what creates the file.
    pub fn new_sync() -> Result<Self> {
        let install_root = find_install_root()?;
        Self::for_root(install_root)
    }

    /// Async wrapper for call sites living in async handlers.
    pub async fn new() -> Result<Self> {
        Self::new_sync()
    }

    /// Create a manager for an explicit install root.
    pub fn for_root(install_root: PathBuf) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        let compose_file = install_root.join(COMPOSE_FILE);

        Ok(Self {
            docker,
            install_root,
            compose_file,
        })
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Check if the Docker daemon is accessible
    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// List all Atlas Edge containers
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("com.docker.compose.project={}", COMPOSE_PROJECT)],
        );

        let options = Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        });

        let containers = self.docker.list_containers(options).await?;

        Ok(containers
            .into_iter()
            .map(Self::container_summary_to_info)
            .collect())
    }

    /// Get container info by container name
    pub async fn get_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let containers = self.list_containers().await?;
        Ok(containers.into_iter().find(|c| c.name == name))
    }

    /// Get a one-shot resource usage sample for a container
    pub async fn get_container_stats(&self, name: &str) -> Result<Option<ContainerStats>> {
        let container_id = match self.get_container(name).await? {
            Some(info) => info.id,
            None => return Ok(None),
        };

        let mut stats_stream = self.docker.stats(
            &container_id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );

        use futures::StreamExt;
        if let Some(Ok(stats)) = stats_stream.next().await {
            let cpu_delta = stats.cpu_stats.cpu_usage.total_usage
                - stats.precpu_stats.cpu_usage.total_usage;
            let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0)
                - stats.precpu_stats.system_cpu_usage.unwrap_or(0);
            let num_cpus = stats.cpu_stats.online_cpus.unwrap_or(1) as u64;

            let cpu_percent = if system_delta > 0 {
                (cpu_delta as f64 / system_delta as f64) * num_cpus as f64 * 100.0
            } else {
                0.0
            };

            let memory_usage = stats.memory_stats.usage.unwrap_or(0);
            let memory_limit = stats.memory_stats.limit.unwrap_or(0);

            let (network_rx, network_tx) = stats
                .networks
                .as_ref()
                .and_then(|networks| networks.get("eth0"))
                .map(|net| (net.rx_bytes, net.tx_bytes))
                .unwrap_or((0, 0));

            Ok(Some(ContainerStats {
                cpu_percent,
                memory_usage,
                memory_limit,
                network_rx,
                network_tx,
            }))
        } else {
            Ok(None)
        }
    }

    /// Execute a docker-compose command against the install root
    pub async fn compose_command(&self, args: &[&str]) -> Result<String> {
        if !self.compose_file.exists() {
            return Err(anyhow!(
                "{} not found at {}",
                COMPOSE_FILE,
                self.compose_file.display()
            ));
        }

        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .args(args)
            .current_dir(&self.install_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .context("Failed to execute docker compose command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Docker compose command failed: {}", stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Start the full stack
    pub async fn compose_up(&self) -> Result<()> {
        self.compose_command(&["up", "-d", "--remove-orphans"]).await?;
        Ok(())
    }

    /// Stop the full stack and remove its containers
    pub async fn compose_down(&self) -> Result<()> {
        self.compose_command(&["down"]).await?;
        Ok(())
    }

    /// Get logs for a service
    pub async fn get_logs(&self, service: &str, tail: Option<usize>) -> Result<String> {
        let mut args = vec!["logs", "--no-color"];
        let tail_str;
        if let Some(n) = tail {
            tail_str = n.to_string();
            args.push("--tail");
            args.push(&tail_str);
        }
        args.push(service);

        self.compose_command(&args).await
    }

    /// Convert ContainerSummary to ContainerInfo
    fn container_summary_to_info(summary: ContainerSummary) -> ContainerInfo {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let status = summary.status.clone().unwrap_or_else(|| "unknown".to_string());
        let state = summary
            .state
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("unknown")
            .into();

        let health = summary.status.as_ref().and_then(|s| {
            // Check unhealthy BEFORE healthy (unhealthy contains "healthy" as substring)
            if s.contains("unhealthy") {
                Some("unhealthy".to_string())
            } else if s.contains("starting") {
                Some("starting".to_string())
            } else if s.contains("healthy") {
                Some("healthy".to_string())
            } else {
                None
            }
        });

        let ports = summary
            .ports
            .as_ref()
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|p| {
                        p.public_port.map(|pub_port| {
                            format!(
                                "{}:{}->{}",
                                p.ip.as_deref().unwrap_or("0.0.0.0"),
                                pub_port,
                                p.private_port
                            )
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        ContainerInfo {
            id: summary.id.unwrap_or_default(),
            name,
            image: summary.image.unwrap_or_else(|| "unknown".to_string()),
            status,
            state,
            health,
            created: summary.created.unwrap_or(0),
            ports,
        }
    }
}
