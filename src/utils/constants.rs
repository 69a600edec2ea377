/// Atlas Edge service definitions and install parameters
///
/// The registry mirrors the services declared in the bundle's
/// docker-compose.yml; it is static and loaded once.

use serde::Serialize;

/// Service registry entry
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Service {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub container_name: &'static str,
    pub public_port: Option<u16>,
    pub critical: bool,
}

/// All Atlas Edge services, in compose startup order.
pub const SERVICES: &[Service] = &[
    Service {
        name: "message-bus",
        display_name: "Message Bus",
        description: "Internal pub/sub fabric between stack services",
        container_name: "atlas-bus",
        public_port: Some(4222),
        critical: true,
    },
    Service {
        name: "timeseries-db",
        display_name: "Timeseries DB",
        description: "Metric and event storage",
        container_name: "atlas-tsdb",
        public_port: Some(8086),
        critical: true,
    },
    Service {
        name: "collector",
        display_name: "Collector",
        description: "Ingest endpoint for edge telemetry",
        container_name: "atlas-collector",
        public_port: Some(4317),
        critical: true,
    },
    Service {
        name: "gateway",
        display_name: "Gateway",
        description: "TLS termination and request routing",
        container_name: "atlas-gateway",
        public_port: Some(8088),
        critical: true,
    },
    Service {
        name: "dashboard",
        display_name: "Dashboard",
        description: "Operator UI",
        container_name: "atlas-dashboard",
        public_port: Some(3000),
        critical: false,
    },
    Service {
        name: "edge-agent",
        display_name: "Edge Agent",
        description: "Host-side relay, ships no health probe",
        container_name: "atlas-agent",
        public_port: None,
        critical: false,
    },
];

/// Look up a service by its registry name.
pub fn find_service(name: &str) -> Option<&'static Service> {
    SERVICES.iter().find(|s| s.name == name)
}

/// Compose project label used to scope container queries.
pub const COMPOSE_PROJECT: &str = "atlas-edge";

/// Default location for the extracted bundle.
pub const DEFAULT_INSTALL_ROOT: &str = "/opt/atlas-edge";

/// Files the bundle must contain after extraction.
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";

/// Release archive location, `{version}` substituted with the semver string.
pub const BUNDLE_URL_TEMPLATE: &str =
    "https://github.com/atlas-edge/bundle/releases/download/v{version}/atlas-edge-v{version}.tar.gz";

/// Bundle version installed when none is pinned.
pub const DEFAULT_BUNDLE_VERSION: &str = "1.7.3";

/// Base tools required before anything else can run.
pub const BASE_TOOLS: &[&str] = &["curl", "ca-certificates", "gnupg", "tar"];

/// Docker engine package (distribution repositories).
pub const DOCKER_PACKAGES: &[&str] = &["docker.io"];

/// Compose plugin package.
pub const COMPOSE_PACKAGES: &[&str] = &["docker-compose-v2"];

/// Kernel parameter drop-in written by the kernel-tuning step.
pub const SYSCTL_DROPIN: &str = "/etc/sysctl.d/99-atlas-edge.conf";

/// Kernel parameters the stack needs.
pub const SYSCTL_SETTINGS: &[(&str, &str)] = &[
    ("vm.max_map_count", "262144"),
    ("net.core.somaxconn", "4096"),
    ("fs.inotify.max_user_watches", "524288"),
];

/// Lines of log output collected per service during a health pass.
pub const HEALTH_LOG_TAIL: usize = 25;

/// Minimum host resources, checked before the first step (warnings only).
pub const MIN_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const MIN_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;
