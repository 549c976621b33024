//! Vaultkeeper CLI - backup and restore for a single-node password-manager
//! deployment.
//!
//! This is the command-line interface for Vaultkeeper. It loads the typed
//! configuration, resolves the backup passphrase, and dispatches into the
//! core pipeline.

mod app;
mod cli;
mod commands;

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::generate;

use vaultkeeper_core::VaultError;

use crate::cli::{Cli, Commands};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            // Preconditions get their own exit code so schedulers can tell
            // "fix the host" apart from "the run went wrong".
            if matches!(
                err.downcast_ref::<VaultError>(),
                Some(VaultError::Precondition(_))
            ) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "vaultkeeper", &mut std::io::stdout());
        return Ok(());
    }

    let config = app::load_config(&cli)?;

    match &cli.command {
        Commands::Backup(args) => commands::backup::handle_backup(&config, args, cli.quiet),
        Commands::FullBackup => commands::backup::handle_full_backup(&config, cli.quiet),
        Commands::Restore(args) => commands::restore::handle_restore(&config, args, cli.quiet),
        Commands::List => commands::status::handle_list(&config, cli.quiet),
        Commands::Verify(args) => commands::status::handle_verify(&config, args, cli.quiet),
        Commands::Prune => commands::backup::handle_prune(&config, cli.quiet),
        Commands::Completions { .. } => unreachable!("handled above"),
    }
}
