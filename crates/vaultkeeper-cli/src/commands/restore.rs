use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use owo_colors::OwoColorize;

use vaultkeeper_core::backup::find_latest_archive;
use vaultkeeper_core::config::VaultkeeperConfig;
use vaultkeeper_core::export::ExportFormat;
use vaultkeeper_core::restore::{HealthBudget, RestoreOrchestrator, RestorePhase};
use vaultkeeper_core::services::{ComposeRuntime, ServiceRuntime};

use crate::app::resolve_passphrase;
use crate::cli::RestoreArgs;

pub fn handle_restore(
    config: &VaultkeeperConfig,
    args: &RestoreArgs,
    quiet: bool,
) -> anyhow::Result<()> {
    let archive = match &args.archive {
        Some(path) => PathBuf::from(path),
        None => {
            let format = ExportFormat::from_name(&args.format).ok_or_else(|| {
                anyhow::anyhow!("Unknown format: {} (use binary or sql)", args.format)
            })?;
            find_latest_archive(&config.db_backup_dir(), format)?
        }
    };
    if !archive.exists() {
        anyhow::bail!("Archive {} not found", archive.display());
    }

    if !args.yes && std::io::stdin().is_terminal() {
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Stop the stack and restore {} over {}?",
                archive.display(),
                config.deployment.database
            ))
            .default(false)
            .interact()?;
        if !proceed {
            anyhow::bail!("Restore cancelled");
        }
    }

    let passphrase = resolve_passphrase(config)?;

    let runtime = ComposeRuntime::new(config.compose_dir());
    let budget = HealthBudget {
        retries: config.health.retries,
        interval: Duration::from_secs(config.health.interval_seconds),
    };
    let orchestrator = RestoreOrchestrator::new(
        &runtime,
        config.database_path(),
        &config.services.core_containers,
        budget,
    );

    let report = orchestrator.restore(&archive, &passphrase)?;
    match report.phase {
        RestorePhase::Healthy => {
            if !quiet {
                println!(
                    "{} restored from {}",
                    "healthy".green(),
                    report.installed_from.display()
                );
            }
            Ok(())
        }
        RestorePhase::Unhealthy => {
            eprintln!(
                "{}: data installed but containers did not report healthy within {} polls; stack left running",
                "unhealthy".red(),
                config.health.retries
            );
            if let Ok(running) = runtime.list_running() {
                eprintln!("Currently running services: {}", running.join(", "));
            }
            anyhow::bail!("Restore finished unhealthy")
        }
        other => anyhow::bail!("Restore stopped in unexpected phase {:?}", other),
    }
}
