use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use vaultkeeper_core::VERSION;

/// Vaultkeeper - backup and restore for a single-node password-manager deployment
#[derive(Parser)]
#[command(name = "vaultkeeper")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "VAULTKEEPER_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a full database backup (all five formats)
    Backup(BackupArgs),

    /// Archive the application's volume state
    FullBackup,

    /// Restore the database from an encrypted archive
    Restore(RestoreArgs),

    /// List backup runs and their outcomes
    List,

    /// Re-run cross-format validation against an existing run
    Verify(VerifyArgs),

    /// Delete backup runs older than the retention window
    Prune,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: Shell,
    },
}

/// Arguments for the `backup` command
#[derive(Args)]
pub struct BackupArgs {
    /// Skip the cross-format validation pass
    #[arg(long)]
    pub skip_validation: bool,

    /// Do not prune expired runs after a successful backup
    #[arg(long)]
    pub no_prune: bool,
}

/// Arguments for the `restore` command
#[derive(Args)]
pub struct RestoreArgs {
    /// Encrypted archive to restore (defaults to the most recent)
    #[arg(long, value_name = "PATH")]
    pub archive: Option<String>,

    /// Format to pick when selecting the most recent archive
    #[arg(long, value_name = "FORMAT", default_value = "binary")]
    pub format: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the `verify` command
#[derive(Args)]
pub struct VerifyArgs {
    /// Run token to verify (defaults to the most recent run)
    #[arg(value_name = "RUN")]
    pub run: Option<String>,
}
