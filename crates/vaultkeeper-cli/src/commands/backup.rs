use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use vaultkeeper_core::backup::{prune_backups, BackupPipeline};
use vaultkeeper_core::config::VaultkeeperConfig;

use crate::app::resolve_passphrase;
use crate::cli::BackupArgs;

pub fn handle_backup(
    config: &VaultkeeperConfig,
    args: &BackupArgs,
    quiet: bool,
) -> anyhow::Result<()> {
    let passphrase = resolve_passphrase(config)?;

    let mut config = config.clone();
    if args.skip_validation {
        config.backup.validate = false;
    }

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("valid template"));
        spinner.set_message(format!("Backing up {}", config.deployment.database));
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));
        spinner
    };

    let outcome = BackupPipeline::new(&config).run(&passphrase);
    spinner.finish_and_clear();
    let outcome = outcome?;

    if !quiet {
        println!("Run {} -> {}", outcome.token, outcome.run_dir.display());
        for file in &outcome.succeeded {
            println!("  {} {}", "ok".green(), file);
        }
        for format in &outcome.failed {
            println!("  {} {} export", "failed".red(), format);
        }
        match outcome.validation_passed {
            Some(true) => println!("  {} cross-format validation", "ok".green()),
            Some(false) => println!("  {} cross-format validation", "failed".red()),
            None => {}
        }
    }

    if !outcome.is_success() {
        anyhow::bail!("Backup produced no usable artifacts");
    }

    if !args.no_prune {
        let removed = prune_backups(&config.db_backup_dir(), config.backup.retention_days)?;
        if !quiet && !removed.is_empty() {
            println!("Pruned {} expired run(s)", removed.len());
        }
    }

    Ok(())
}

pub fn handle_full_backup(config: &VaultkeeperConfig, quiet: bool) -> anyhow::Result<()> {
    let passphrase = resolve_passphrase(config)?;
    let archive = BackupPipeline::new(config).full_backup(&passphrase)?;
    if !quiet {
        println!("Volume state archived to {}", archive.display());
    }
    Ok(())
}

pub fn handle_prune(config: &VaultkeeperConfig, quiet: bool) -> anyhow::Result<()> {
    let mut removed = prune_backups(&config.db_backup_dir(), config.backup.retention_days)?;
    removed.extend(prune_backups(
        &config.full_backup_dir(),
        config.backup.retention_days,
    )?);
    if !quiet {
        if removed.is_empty() {
            println!(
                "Nothing to prune (retention {} days)",
                config.backup.retention_days
            );
        } else {
            for path in &removed {
                println!("Removed {}", path.display());
            }
        }
    }
    Ok(())
}
