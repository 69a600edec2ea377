/// Health reporting for Atlas Edge services
///
/// One pass walks the static service registry, classifies every service
/// from observed container state, and aggregates a single pass/fail
/// verdict. Per-service queries are independent reads and run in parallel;
/// log tails are diagnostics only and never affect the verdict.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::core::docker::{ContainerInfo, DockerManager};
use crate::utils::constants::{Service, HEALTH_LOG_TAIL, SERVICES};

/// Classification of one service, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    /// No container instance exists for the service.
    NotFound,
    /// A container exists but is not running.
    Stopped,
    /// Running, but the declared health probe is not reporting healthy.
    Degraded,
    /// Running with a healthy probe.
    Ok,
    /// Running with no health probe configured; counts as healthy.
    OkUnmonitored,
}

impl ServiceStatus {
    /// Whether this status contributes to an aggregate failure verdict.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ServiceStatus::NotFound | ServiceStatus::Stopped | ServiceStatus::Degraded
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceStatus::NotFound => "NOT FOUND",
            ServiceStatus::Stopped => "STOPPED",
            ServiceStatus::Degraded => "DEGRADED",
            ServiceStatus::Ok => "OK",
            ServiceStatus::OkUnmonitored => "OK (unmonitored)",
        }
    }
}

/// Error/warning counts scraped from a service's log tail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogFindings {
    pub errors: usize,
    pub warnings: usize,
}

/// Result of checking one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: &'static Service,
    pub status: ServiceStatus,
    pub detail: String,
    /// Recent log tail; None when the log stream could not be read.
    pub log_tail: Option<String>,
    pub log_findings: Option<LogFindings>,
}

/// Aggregate result of one health pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub services: Vec<ServiceReport>,
}

impl HealthReport {
    /// OR-accumulated verdict: failure if any service failed its check.
    pub fn has_failures(&self) -> bool {
        self.services.iter().any(|s| s.status.is_failure())
    }

    pub fn failed_services(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(|s| s.status.is_failure())
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }
}

/// Classify one service from the observed container facts.
///
/// Pure so it can be tested without a Docker daemon.
pub fn classify(container: Option<&ContainerInfo>) -> (ServiceStatus, String) {
    let Some(container) = container else {
        return (ServiceStatus::NotFound, "no container instance".to_string());
    };

    if !container.state.is_running() {
        return (ServiceStatus::Stopped, container.status.clone());
    }

    match container.health.as_deref() {
        Some("healthy") => (ServiceStatus::Ok, "health probe passing".to_string()),
        Some(other) => (
            ServiceStatus::Degraded,
            format!("health probe reports {}", other),
        ),
        None => (
            ServiceStatus::OkUnmonitored,
            "running, no health probe configured".to_string(),
        ),
    }
}

/// Count error and warning lines in a log tail.
pub fn scan_log_tail(logs: &str) -> LogFindings {
    static ERROR_RE: OnceLock<Regex> = OnceLock::new();
    static WARN_RE: OnceLock<Regex> = OnceLock::new();

    let error_re =
        ERROR_RE.get_or_init(|| Regex::new(r"(?i)\b(error|fatal|panic)\b").unwrap());
    let warn_re = WARN_RE.get_or_init(|| Regex::new(r"(?i)\b(warn|warning)\b").unwrap());

    let mut findings = LogFindings::default();
    for line in logs.lines() {
        if error_re.is_match(line) {
            findings.errors += 1;
        } else if warn_re.is_match(line) {
            findings.warnings += 1;
        }
    }
    findings
}

pub struct HealthChecker {
    docker: DockerManager,
}

impl HealthChecker {
    pub fn new(docker: DockerManager) -> Self {
        Self { docker }
    }

    /// Run one full health pass over the registry.
    pub async fn check_all(&self) -> Result<HealthReport> {
        let containers = self.docker.list_containers().await?;

        // Classification is immediate; log tails are fetched in parallel
        // for the services whose containers exist.
        let mut reports: Vec<ServiceReport> = SERVICES
            .iter()
            .map(|service| {
                let container = containers
                    .iter()
                    .find(|c| c.name == service.container_name);
                let (status, detail) = classify(container);
                ServiceReport {
                    service,
                    status,
                    detail,
                    log_tail: None,
                    log_findings: None,
                }
            })
            .collect();

        let tail_targets: Vec<&'static str> = reports
            .iter()
            .filter(|r| r.status != ServiceStatus::NotFound)
            .map(|r| r.service.name)
            .collect();

        use futures::future::join_all;
        let tail_futures = tail_targets.iter().map(|name| async move {
            let tail = self.docker.get_logs(name, Some(HEALTH_LOG_TAIL)).await.ok();
            (*name, tail)
        });

        for (name, tail) in join_all(tail_futures).await {
            if let Some(report) = reports.iter_mut().find(|r| r.service.name == name) {
                report.log_findings = tail.as_deref().map(scan_log_tail);
                report.log_tail = tail;
            }
        }

        Ok(HealthReport { services: reports })
    }
}
