//! Application-level utilities: config resolution and passphrase handling.

use std::io::IsTerminal;
use std::path::PathBuf;

use dialoguer::Password;
use secrecy::SecretString;

use vaultkeeper_core::config::{default_config_path, read_config, VaultkeeperConfig};
use vaultkeeper_core::secrets::{PassphraseSource, PASSPHRASE_ENV};
use vaultkeeper_core::VaultError;

use crate::cli::Cli;

pub fn load_config(cli: &Cli) -> anyhow::Result<VaultkeeperConfig> {
    let path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    if !path.exists() {
        anyhow::bail!(
            "Config file {} not found. Create it or pass --config.",
            path.display()
        );
    }
    Ok(read_config(&path)?)
}

/// Resolve the backup passphrase: environment, then the configured
/// passphrase file, then an interactive prompt when a terminal is attached.
pub fn resolve_passphrase(config: &VaultkeeperConfig) -> anyhow::Result<SecretString> {
    let source = PassphraseSource::from_file(
        config.security.passphrase_file.as_ref().map(PathBuf::from),
    );
    match source.resolve() {
        Ok(secret) => Ok(secret),
        Err(VaultError::NotFound(_)) if std::io::stdin().is_terminal() => {
            let value = Password::new()
                .with_prompt("Backup passphrase")
                .interact()
                .map_err(|e| anyhow::anyhow!("Failed to read passphrase: {}", e))?;
            vaultkeeper_core::crypto::validate_passphrase(&value)?;
            Ok(SecretString::from(value))
        }
        Err(e) => Err(anyhow::anyhow!(
            "{} (set {} or configure security.passphrase_file)",
            e,
            PASSPHRASE_ENV
        )),
    }
}
