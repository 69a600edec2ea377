use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use semver::Version;
use std::io::Write;
use std::sync::Arc;
use sysinfo::System;

use atlas_cli::cli::{Cli, Commands, ConfigCommands};
use atlas_cli::core::health::{HealthChecker, HealthReport, ServiceStatus};
use atlas_cli::core::runner::SystemRunner;
use atlas_cli::core::sequencer::{RunOutcome, Sequencer, Step, UnwindOutcome};
use atlas_cli::core::steps::{install_steps, uninstall_steps, InstallOptions};
use atlas_cli::core::{system, DockerManager, EnvConfig};
use atlas_cli::utils::constants::{DEFAULT_BUNDLE_VERSION, ENV_FILE};
use atlas_cli::utils::logging::init_run_logging;
use atlas_cli::utils::{find_install_root, format_bytes, mask_sensitive, AppConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // All command handlers return a typed exit code; this is the single
    // place that terminates the process.
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Install {
            bundle_version,
            install_root,
            node_id,
            skip_health,
        } => handle_install(bundle_version, install_root, node_id, skip_health).await,
        Commands::Health { json } => handle_health(json).await,
        Commands::Status => handle_status().await,
        Commands::Logs { service, tail } => handle_logs(service, tail).await,
        Commands::Uninstall { yes } => handle_uninstall(yes).await,
        Commands::Config { command } => handle_config(command).await,
    }
}

async fn handle_install(
    bundle_version: Option<String>,
    install_root: Option<std::path::PathBuf>,
    node_id: Option<String>,
    skip_health: bool,
) -> Result<i32> {
    let log_path = init_run_logging("install")?;
    println!("Run log: {}\n", log_path.display());

    let app_config = AppConfig::load().unwrap_or_default();

    let version_str = bundle_version
        .or(app_config.bundle_version.clone())
        .unwrap_or_else(|| DEFAULT_BUNDLE_VERSION.to_string());
    let version = Version::parse(&version_str)
        .with_context(|| format!("invalid bundle version: {}", version_str))?;

    let install_root = match install_root {
        Some(root) => root,
        None => find_install_root()?,
    };

    let node_id = node_id
        .or_else(System::host_name)
        .unwrap_or_else(|| "atlas-edge-node".to_string());

    println!("Installing Atlas Edge v{}", version);
    println!("  install root: {}", install_root.display());
    println!("  node id:      {}\n", node_id);

    let preflight = system::preflight();
    for warning in &preflight.warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
    if !preflight.warnings.is_empty() {
        println!();
    }

    let opts = InstallOptions {
        install_root: install_root.clone(),
        bundle_version: version.clone(),
        node_id,
        skip_health,
    };

    let runner = Arc::new(SystemRunner);
    let mut steps = install_steps(&opts, runner)?;
    let mut sequencer = Sequencer::new();

    match sequencer.run(&mut steps).await {
        RunOutcome::Completed { steps } => {
            let mut config = app_config;
            let _ = config.set_install_root(install_root);
            let _ = config.set_bundle_version(&version.to_string());

            println!(
                "\n{} Install complete ({} steps)",
                "✓".green(),
                steps.len()
            );
            println!("\nNext steps:");
            println!("  atlas-cli status    # container overview");
            println!("  atlas-cli health    # full health pass");
            Ok(0)
        }
        outcome @ RunOutcome::Unwound { .. } => {
            let RunOutcome::Unwound {
                failed,
                error,
                compensations,
            } = &outcome
            else {
                unreachable!()
            };

            println!(
                "\n{} Step {} failed: {:#}",
                "✗".red(),
                failed.name().bold(),
                error
            );

            if compensations.is_empty() {
                println!("Nothing to roll back.");
            } else {
                println!("Rolled back {} completed step(s):", compensations.len());
                for record in compensations {
                    let note = match &record.outcome {
                        UnwindOutcome::Undone => "undone".to_string(),
                        UnwindOutcome::CannotUndo(reason) => format!("cannot undo: {}", reason),
                        UnwindOutcome::Failed(err) => format!("compensation failed: {:#}", err),
                    };
                    println!("  {:<22} {}", record.step.name(), note);
                }
            }

            println!("\nSee the run log for details: {}", log_path.display());
            Ok(outcome.exit_code())
        }
    }
}

async fn handle_health(json: bool) -> Result<i32> {
    let log_path = init_run_logging("health")?;

    let docker = DockerManager::new().await?;
    if !docker.ping().await {
        println!("{} Docker daemon is not reachable", "✗".red());
        return Ok(1);
    }

    let checker = HealthChecker::new(docker);
    let report = checker.check_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_health_report(&report);
        println!("\nRun log: {}", log_path.display());
    }

    Ok(report.exit_code())
}

fn render_health_report(report: &HealthReport) {
    println!("Atlas Edge Health\n");
    println!("{:<16} {:<18} {}", "Service", "Status", "Detail");
    println!("{}", "-".repeat(72));

    for entry in &report.services {
        let mut detail = entry.detail.clone();
        if let Some(findings) = entry.log_findings {
            if findings.errors > 0 || findings.warnings > 0 {
                detail.push_str(&format!(
                    " [{} error(s), {} warning(s) in log tail]",
                    findings.errors, findings.warnings
                ));
            }
        }
        if entry.status != ServiceStatus::NotFound && entry.log_tail.is_none() {
            detail.push_str(" [log stream unavailable]");
        }

        println!(
            "{:<16} {:<18} {}",
            entry.service.name,
            entry.status.label(),
            detail
        );
    }

    println!();
    if report.has_failures() {
        let names: Vec<&str> = report.failed_services().map(|s| s.service.name).collect();
        println!(
            "{} {} service(s) unhealthy: {}",
            "✗".red(),
            names.len(),
            names.join(", ")
        );
    } else {
        println!("{} All services healthy", "✓".green());
    }
}

async fn handle_status() -> Result<i32> {
    let docker = DockerManager::new().await?;
    let containers = docker.list_containers().await?;

    if containers.is_empty() {
        println!("No Atlas Edge containers found. Is the stack installed?");
        return Ok(0);
    }

    // Resource samples are independent reads; fetch them in parallel
    use futures::future::join_all;
    let stats_futures = containers.iter().map(|c| {
        let name = c.name.clone();
        let docker = docker.clone();
        async move { docker.get_container_stats(&name).await.ok().flatten() }
    });
    let stats = join_all(stats_futures).await;

    println!("Atlas Edge Status\n");
    println!(
        "{:<16} {:<12} {:<12} {:<10} {:<22} {}",
        "Container", "State", "Health", "CPU", "Memory", "Ports"
    );
    println!("{}", "-".repeat(90));

    for (container, stats) in containers.iter().zip(stats) {
        let health = container.health.as_deref().unwrap_or("N/A");
        let (cpu, mem) = match stats {
            Some(s) => (
                format!("{:.1}%", s.cpu_percent),
                format!(
                    "{} / {}",
                    format_bytes(s.memory_usage),
                    format_bytes(s.memory_limit)
                ),
            ),
            None => ("N/A".to_string(), "N/A".to_string()),
        };

        println!(
            "{:<16} {:<12} {:<12} {:<10} {:<22} {}",
            container.name,
            container.state.as_str(),
            health,
            cpu,
            mem,
            container.ports.join(", ")
        );
    }

    Ok(0)
}

async fn handle_logs(service: String, tail: usize) -> Result<i32> {
    let docker = DockerManager::new().await?;
    let logs = docker.get_logs(&service, Some(tail)).await?;
    print!("{}", logs);
    Ok(0)
}

async fn handle_uninstall(yes: bool) -> Result<i32> {
    let install_root = find_install_root()?;

    if !yes {
        print!(
            "Remove the Atlas Edge stack at {}? This stops all services \
             and deletes the bundle and its configuration. [y/N] ",
            install_root.display()
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Aborted.");
            return Ok(0);
        }
    }

    let log_path = init_run_logging("uninstall")?;
    println!("Run log: {}\n", log_path.display());

    let app_config = AppConfig::load().unwrap_or_default();
    let version_str = app_config
        .bundle_version
        .clone()
        .unwrap_or_else(|| DEFAULT_BUNDLE_VERSION.to_string());
    let version = Version::parse(&version_str)
        .with_context(|| format!("invalid pinned bundle version: {}", version_str))?;

    let opts = InstallOptions {
        install_root,
        bundle_version: version,
        node_id: String::new(),
        skip_health: false,
    };

    let runner = Arc::new(SystemRunner);
    let mut steps = uninstall_steps(&opts, runner)?;

    // Replay the full compensation chain in reverse install order
    let mut sequencer = Sequencer::with_completed(Step::ALL.to_vec());
    let records = sequencer.unwind(&mut steps).await;

    let mut failures = 0;
    for record in &records {
        let note = match &record.outcome {
            UnwindOutcome::Undone => "removed".to_string(),
            UnwindOutcome::CannotUndo(reason) => format!("left in place: {}", reason),
            UnwindOutcome::Failed(err) => {
                failures += 1;
                format!("failed: {:#}", err)
            }
        };
        println!("  {:<22} {}", record.step.name(), note);
    }

    if failures == 0 {
        println!("\n{} Uninstall complete", "✓".green());
        Ok(0)
    } else {
        println!(
            "\n{} Uninstall finished with {} failed step(s); see the run log",
            "✗".red(),
            failures
        );
        Ok(1)
    }
}

async fn handle_config(command: ConfigCommands) -> Result<i32> {
    let install_root = find_install_root()?;
    let env_path = install_root.join(ENV_FILE);
    let config = EnvConfig::load(&env_path)?;

    match command {
        ConfigCommands::View => {
            println!("Configuration ({}):\n", env_path.display());
            for key in config.keys() {
                if let Some(value) = config.get(&key) {
                    // Mask sensitive values
                    let display_value = if key.contains("PASSWORD")
                        || key.contains("SECRET")
                        || key.contains("TOKEN")
                    {
                        mask_sensitive(value, 4)
                    } else {
                        value.to_string()
                    };
                    println!("{}: {}", key, display_value);
                }
            }
            Ok(0)
        }
        ConfigCommands::Validate => {
            let errors = config.validate();

            if errors.is_empty() {
                println!("{} Configuration is valid", "✓".green());
                Ok(0)
            } else {
                println!("{} Configuration errors:", "✗".red());
                for error in errors {
                    println!("  - {}", error);
                }
                Ok(1)
            }
        }
    }
}
