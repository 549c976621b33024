//! The restore path.
//!
//! `Idle → Decrypting → Stopped → Installing → Starting → HealthChecking →
//! {Healthy | Unhealthy}`. Decryption happens before the stack is touched:
//! a wrong passphrase must not cost an outage. The live database file is
//! only ever replaced by an atomic rename of a verified sibling, and the
//! decrypted plaintext is removed on every exit path.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, VaultError};
use crate::export::ExportFormat;
use crate::fs::{remove_path, rename_with_fallback, unique_temp_path};
use crate::package::decompress_file;
use crate::services::{HealthState, ServiceRuntime};
use crate::verify::integrity_check;

/// Where a restore stopped or finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    Decrypting,
    Stopped,
    Installing,
    Starting,
    HealthChecking,
    Healthy,
    Unhealthy,
}

/// Health-check budget: `retries` polls at `interval` apart.
#[derive(Debug, Clone, Copy)]
pub struct HealthBudget {
    pub retries: u32,
    pub interval: Duration,
}

/// Result of a restore that ran to the health gate.
#[derive(Debug)]
pub struct RestoreReport {
    pub phase: RestorePhase,
    pub installed_from: PathBuf,
}

impl RestoreReport {
    pub fn is_healthy(&self) -> bool {
        self.phase == RestorePhase::Healthy
    }
}

/// Removes its path when dropped, so decrypted plaintext never survives an
/// early return.
struct TempGuard {
    path: PathBuf,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        let _ = remove_path(&self.path);
    }
}

pub struct RestoreOrchestrator<'a, R: ServiceRuntime> {
    runtime: &'a R,
    target: PathBuf,
    core_containers: &'a [String],
    budget: HealthBudget,
}

impl<'a, R: ServiceRuntime> RestoreOrchestrator<'a, R> {
    pub fn new(
        runtime: &'a R,
        target: PathBuf,
        core_containers: &'a [String],
        budget: HealthBudget,
    ) -> Self {
        Self {
            runtime,
            target,
            core_containers,
            budget,
        }
    }

    /// Restore one archive. Fatal errors (bad passphrase, failed install
    /// check) return `Err`; a restore that reaches the health gate returns
    /// a report whose phase is `Healthy` or `Unhealthy`.
    pub fn restore(&self, archive: &Path, passphrase: &SecretString) -> Result<RestoreReport> {
        let kind = archive_kind(archive)?;

        log::info!("Restore phase: Decrypting {}", archive.display());
        let plain = self.decrypt_archive(archive, passphrase)?;
        let _plain_guard = TempGuard {
            path: plain.clone(),
        };

        // Never overwrite a database a running process may hold open.
        log::info!("Restore phase: Stopped");
        self.runtime.stack_down()?;

        log::info!("Restore phase: Installing ({})", kind_name(kind));
        match kind {
            ExportFormat::Binary => self.install_binary(&plain)?,
            ExportFormat::SqlDump => self.install_dump(&plain)?,
            _ => unreachable!("archive_kind only admits binary and sql"),
        }

        log::info!("Restore phase: Starting");
        self.runtime.stack_up()?;

        log::info!("Restore phase: HealthChecking");
        let phase = if self.poll_health() {
            RestorePhase::Healthy
        } else {
            // Terminal, surfaced to the operator; the stack stays running.
            // Rollback is an explicit, separate operator action.
            log::warn!(
                "Health budget exhausted ({} x {}s); stack left running",
                self.budget.retries,
                self.budget.interval.as_secs()
            );
            RestorePhase::Unhealthy
        };

        Ok(RestoreReport {
            phase,
            installed_from: archive.to_path_buf(),
        })
    }

    /// Decrypt and decompress into a uniquely-named plaintext sibling of
    /// the target. Both intermediates are cleaned up on failure.
    fn decrypt_archive(&self, archive: &Path, passphrase: &SecretString) -> Result<PathBuf> {
        let gz = unique_temp_path(&self.target, "restore.gz")?;
        let gz_guard = TempGuard { path: gz.clone() };

        crate::crypto::decrypt_file(archive, &gz, passphrase.expose_secret())?;

        let plain = unique_temp_path(&self.target, "restore")?;
        if let Err(e) = decompress_file(&gz, &plain) {
            let _ = remove_path(&plain);
            return Err(e);
        }
        drop(gz_guard);
        Ok(plain)
    }

    /// Binary install: copy to a `.tmp` sibling, verify the sibling, then
    /// atomically rename it over the live path. A failed check leaves the
    /// live file exactly as it was.
    fn install_binary(&self, plain: &Path) -> Result<()> {
        let tmp = unique_temp_path(&self.target, "tmp")?;
        std::fs::copy(plain, &tmp)?;

        if let Err(e) = integrity_check(&tmp) {
            let _ = remove_path(&tmp);
            return Err(VaultError::Verification(format!(
                "Restored snapshot failed integrity check, live database untouched: {}",
                e
            )));
        }

        self.remove_journal_siblings()?;
        rename_with_fallback(&tmp, &self.target)?;
        Ok(())
    }

    /// Dump install: the live file is removed and recreated by replaying
    /// the dump. A failed check here is fatal; the operator needs a prior
    /// archive.
    fn install_dump(&self, dump: &Path) -> Result<()> {
        let text = std::fs::read_to_string(dump)?;

        remove_path(&self.target)?;
        self.remove_journal_siblings()?;

        let conn = Connection::open(&self.target)?;
        conn.execute_batch(&text)
            .map_err(|e| VaultError::Database(format!("Dump replay failed: {}", e)))?;
        drop(conn);

        integrity_check(&self.target).map_err(|e| {
            VaultError::Verification(format!(
                "Replayed database failed integrity check; restore from a prior archive: {}",
                e
            ))
        })
    }

    /// Stale journal siblings from the previous database must not be
    /// replayed against the restored file.
    fn remove_journal_siblings(&self) -> Result<()> {
        remove_path(&crate::prepare::wal_path(&self.target))?;
        let mut shm = self.target.as_os_str().to_os_string();
        shm.push("-shm");
        remove_path(Path::new(&shm))?;
        Ok(())
    }

    /// All core containers must report healthy within the budget.
    fn poll_health(&self) -> bool {
        for attempt in 1..=self.budget.retries {
            let mut all_healthy = true;
            for container in self.core_containers {
                match self.runtime.container_health(container) {
                    Ok(HealthState::Healthy) => {}
                    Ok(state) => {
                        log::debug!("{} is {:?} (poll {})", container, state, attempt);
                        all_healthy = false;
                    }
                    Err(e) => {
                        log::debug!("{} health query failed: {} (poll {})", container, e, attempt);
                        all_healthy = false;
                    }
                }
            }
            if all_healthy {
                return true;
            }
            if attempt < self.budget.retries {
                thread::sleep(self.budget.interval);
            }
        }
        false
    }
}

/// Only the binary snapshot and the SQL dump are restorable through the
/// orchestrator; the other formats are recovery aids.
fn archive_kind(archive: &Path) -> Result<ExportFormat> {
    let name = archive
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if name.starts_with("db-binary-") {
        Ok(ExportFormat::Binary)
    } else if name.starts_with("db-sql-") {
        Ok(ExportFormat::SqlDump)
    } else {
        Err(VaultError::InvalidInput(format!(
            "{} is not a restorable archive (expected db-binary-* or db-sql-*)",
            name
        )))
    }
}

fn kind_name(kind: ExportFormat) -> &'static str {
    match kind {
        ExportFormat::Binary => "binary snapshot",
        ExportFormat::SqlDump => "dump replay",
        _ => "unsupported",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_kind_detection() {
        assert_eq!(
            archive_kind(Path::new("db-binary-20260807-120000.sqlite3.gz.age")).unwrap(),
            ExportFormat::Binary
        );
        assert_eq!(
            archive_kind(Path::new("/backups/db/x/db-sql-20260807-120000.sql.gz.age")).unwrap(),
            ExportFormat::SqlDump
        );
        assert!(archive_kind(Path::new("db-csv-20260807-120000.tar.gz.age")).is_err());
    }

    #[test]
    fn test_temp_guard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leftover");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = TempGuard { path: path.clone() };
        }
        assert!(!path.exists());
    }
}
