//! Typed configuration for a Vaultkeeper deployment.
//!
//! Configuration is loaded once from TOML and passed by reference into each
//! component's constructor. There is no ambient global lookup: components
//! only see the sections they are given.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultkeeperConfig {
    pub deployment: DeploymentSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub services: ServicesSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub security: SecuritySection,
}

/// Where the deployment lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSection {
    /// Application data directory (volume state).
    pub data_dir: String,
    /// The SQLite database file inside the deployment.
    pub database: String,
    /// Directory holding the compose file; `docker compose` runs here.
    pub compose_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSection {
    /// Root directory for backups (`db/` and `full/` live under it).
    pub root: String,
    /// Days to keep run directories before pruning.
    pub retention_days: u32,
    /// Run cross-format validation after each backup.
    pub validate: bool,
    /// Optional command handed the finished run directory, e.g. an rclone
    /// wrapper script. Absence or failure is a warning, never an error.
    pub sync_command: Option<String>,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            root: "backups".to_string(),
            retention_days: 30,
            validate: true,
            sync_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesSection {
    /// Containers that must report healthy after a restore.
    pub core_containers: Vec<String>,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            // Literal fallback for a stock single-node deployment.
            core_containers: vec!["vaultwarden".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSection {
    /// Maximum health polls before the restore is declared unhealthy.
    pub retries: u32,
    /// Seconds between health polls.
    pub interval_seconds: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            retries: 30,
            interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySection {
    /// File holding the backup passphrase (trailing newline ignored).
    pub passphrase_file: Option<String>,
}

impl VaultkeeperConfig {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.deployment.database)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.deployment.data_dir)
    }

    pub fn compose_dir(&self) -> PathBuf {
        PathBuf::from(&self.deployment.compose_dir)
    }

    pub fn backup_root(&self) -> PathBuf {
        PathBuf::from(&self.backup.root)
    }

    /// Database backup runs live under `<root>/db/<timestamp>/`.
    pub fn db_backup_dir(&self) -> PathBuf {
        self.backup_root().join("db")
    }

    /// Volume-state backups live under `<root>/full/<timestamp>/`.
    pub fn full_backup_dir(&self) -> PathBuf {
        self.backup_root().join("full")
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("vaultkeeper.toml")
}

pub fn read_config(path: &Path) -> Result<VaultkeeperConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        VaultError::InvalidInput(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    toml::from_str(&contents).map_err(|e| {
        VaultError::InvalidInput(format!("Failed to parse config {}: {}", path.display(), e))
    })
}

pub fn write_config(path: &Path, config: &VaultkeeperConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VaultError::Storage(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let contents = toml::to_string_pretty(config)
        .map_err(|e| VaultError::InvalidInput(format!("TOML error: {}", e)))?;
    std::fs::write(path, contents).map_err(|e| {
        VaultError::Storage(format!("Failed to write config {}: {}", path.display(), e))
    })?;
    Ok(())
}
