//! The backup pipeline.
//!
//! Stages run as an explicit sequence: resource governor, consistency
//! preparer, the five exporters, per-artifact verification, cross-format
//! validation, packaging, manifest. Aggregation happens here: a single
//! format failing degrades the run; zero usable artifacts fails it; only
//! the disk-space precondition aborts before any work.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::config::VaultkeeperConfig;
use crate::error::{Result, VaultError};
use crate::export::{
    run_exporters, ArtifactResult, ExportFormat, ExportSettings,
};
use crate::manifest::{Manifest, SourceInfo};
use crate::package::package_artifact;
use crate::prepare::{prepare_source, wal_size};
use crate::resources::{backup_timeout, check_preconditions, SystemSnapshot};
use crate::verify::{validate_run, verify_artifacts};

const TOKEN_FORMAT: &str = "%Y%m%d-%H%M%S";

/// One backup invocation: immutable once its manifest is written.
#[derive(Debug)]
pub struct BackupRun {
    /// Timestamp token identifying the run and its directory.
    pub token: String,
    pub source: PathBuf,
    pub timeout: std::time::Duration,
    pub profile: crate::resources::ResourceProfile,
    pub artifacts: Vec<crate::export::ExportArtifact>,
}

/// What a finished run looks like to the caller.
#[derive(Debug)]
pub struct BackupOutcome {
    pub token: String,
    pub run_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub validation_passed: Option<bool>,
}

impl BackupOutcome {
    /// Partial success counts: a run with at least one usable archive is a
    /// success; zero usable archives is an overall failure even if no
    /// single stage crashed.
    pub fn is_success(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Orchestrates one database backup run.
pub struct BackupPipeline<'a> {
    config: &'a VaultkeeperConfig,
}

impl<'a> BackupPipeline<'a> {
    pub fn new(config: &'a VaultkeeperConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, passphrase: &SecretString) -> Result<BackupOutcome> {
        let source = self.config.database_path();
        let db_size = std::fs::metadata(&source)
            .map_err(|e| {
                VaultError::Precondition(format!(
                    "Source database {} unreadable: {}",
                    source.display(),
                    e
                ))
            })?
            .len();

        // Hard precondition: the run must not start without disk headroom.
        let snapshot = SystemSnapshot::collect(&self.config.db_backup_dir())?;
        let profile = check_preconditions(&snapshot, db_size)?;
        let timeout = backup_timeout(db_size, wal_size(&source));
        log::info!(
            "Backup budget: {}s timeout, streaming={}, low_priority={}",
            timeout.as_secs(),
            profile.streaming,
            profile.low_priority
        );

        let mut run = BackupRun {
            token: Utc::now().format(TOKEN_FORMAT).to_string(),
            source: source.clone(),
            timeout,
            profile,
            artifacts: Vec::new(),
        };
        let run_dir = self.config.db_backup_dir().join(&run.token);
        std::fs::create_dir_all(&run_dir)?;

        let prepared = prepare_source(&source, timeout)?;

        let settings = ExportSettings { timeout, profile };
        run.artifacts = run_exporters(&run.source, &run_dir, &run.token, &settings);
        verify_artifacts(&mut run.artifacts, &run.source);

        let validation = if self.config.backup.validate {
            Some(validate_run(&run.artifacts))
        } else {
            None
        };

        let mut manifest = Manifest::new(
            &run.token,
            SourceInfo {
                size_bytes: db_size,
                journal_mode: prepared.journal_mode.clone(),
                engine_version: rusqlite::version().to_string(),
            },
        );

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for artifact in &run.artifacts {
            match &artifact.result {
                ArtifactResult::Exported => {
                    match package_artifact(
                        &artifact.path,
                        profile.streaming,
                        passphrase.expose_secret(),
                    ) {
                        Ok(archive) => {
                            let file = archive
                                .path
                                .file_name()
                                .map(|name| name.to_string_lossy().to_string())
                                .unwrap_or_else(|| archive.path.display().to_string());
                            manifest.record_success(
                                artifact.format,
                                &file,
                                archive.size,
                                &archive.digest,
                            );
                            succeeded.push(file);
                        }
                        Err(e) => {
                            log::warn!("Packaging {} failed: {}", artifact.format, e);
                            manifest.record_failure(artifact.format, &e.to_string());
                            failed.push(artifact.format.name().to_string());
                        }
                    }
                }
                ArtifactResult::Failed(reason) | ArtifactResult::Rejected(reason) => {
                    manifest.record_failure(artifact.format, reason);
                    failed.push(artifact.format.name().to_string());
                }
            }
        }

        if let Some(report) = &validation {
            manifest.record_validation(report);
        }

        // The manifest records the state of the world, partial failure
        // included.
        let manifest_path = manifest.write(&run_dir)?;

        let outcome = BackupOutcome {
            token: run.token,
            run_dir: run_dir.clone(),
            manifest_path,
            succeeded,
            failed,
            validation_passed: validation.as_ref().map(|report| report.passed()),
        };

        if outcome.is_success() {
            self.hand_off_to_sync(&run_dir);
        }

        Ok(outcome)
    }

    /// Hand the finished run directory to the configured sync command.
    /// Absence or failure of the tool is a warning, never an error.
    fn hand_off_to_sync(&self, run_dir: &Path) {
        let Some(command) = &self.config.backup.sync_command else {
            return;
        };
        log::info!("Handing {} to sync command", run_dir.display());
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("{} {}", command, run_dir.display()))
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => log::warn!("Sync command exited with {}", status),
            Err(e) => log::warn!("Sync command unavailable: {}", e),
        }
    }

    /// Archive the application's volume state (the database file and its
    /// journal siblings are excluded; they have their own pipeline).
    pub fn full_backup(&self, passphrase: &SecretString) -> Result<PathBuf> {
        let data_dir = self.config.data_dir();
        if !data_dir.is_dir() {
            return Err(VaultError::Precondition(format!(
                "Data directory {} does not exist",
                data_dir.display()
            )));
        }

        let token = Utc::now().format(TOKEN_FORMAT).to_string();
        let run_dir = self.config.full_backup_dir().join(&token);
        std::fs::create_dir_all(&run_dir)?;

        let database = self.config.database_path();
        let mut excluded = vec![database.clone()];
        excluded.push(crate::prepare::wal_path(&database));
        let mut shm = database.as_os_str().to_os_string();
        shm.push("-shm");
        excluded.push(PathBuf::from(shm));

        let archive = run_dir.join(format!("volume-{}.tar.gz", token));
        write_volume_archive(&data_dir, &archive, &excluded)?;

        let encrypted = run_dir.join(format!("volume-{}.tar.gz.age", token));
        match crate::crypto::encrypt_file(&archive, &encrypted, passphrase.expose_secret()) {
            Ok(_) => crate::fs::secure_remove(&archive)?,
            Err(e) => {
                let _ = crate::fs::remove_path(&encrypted);
                return Err(e);
            }
        }

        let manifest = serde_json::json!({
            "created_at": Utc::now().to_rfc3339(),
            "run": token,
            "source_dir": data_dir.display().to_string(),
            "archive": encrypted.file_name().map(|name| name.to_string_lossy().to_string()),
            "excluded": excluded.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
        });
        std::fs::write(
            run_dir.join(crate::manifest::MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        Ok(encrypted)
    }
}

fn write_volume_archive(data_dir: &Path, archive: &Path, excluded: &[PathBuf]) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let file = std::io::BufWriter::new(std::fs::File::create(archive)?);
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_dir_filtered(&mut builder, data_dir, data_dir, excluded)?;

    builder
        .into_inner()
        .map_err(|e| VaultError::Storage(format!("Tar finish failed: {}", e)))?
        .finish()
        .map_err(|e| VaultError::Storage(format!("Gzip finish failed: {}", e)))?
        .into_inner()
        .map_err(|e| VaultError::Storage(format!("Flush failed: {}", e)))?;
    Ok(())
}

fn append_dir_filtered<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    base: &Path,
    dir: &Path,
    excluded: &[PathBuf],
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if excluded.iter().any(|skip| skip == &path) {
            log::debug!("Excluding {} from volume archive", path.display());
            continue;
        }
        let relative = path
            .strip_prefix(base)
            .map_err(|e| VaultError::Storage(format!("Path outside archive root: {}", e)))?;
        if path.is_dir() {
            builder
                .append_dir(relative, &path)
                .map_err(|e| VaultError::Storage(format!("Tar dir failed: {}", e)))?;
            append_dir_filtered(builder, base, &path, excluded)?;
        } else {
            builder
                .append_path_with_name(&path, relative)
                .map_err(|e| VaultError::Storage(format!("Tar file failed: {}", e)))?;
        }
    }
    Ok(())
}

/// Parse a run token back into a timestamp. Directories that are not run
/// tokens (scratch files, editor droppings) simply do not parse.
pub fn parse_run_token(token: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(token, TOKEN_FORMAT).ok()
}

/// Delete run directories older than the retention window. Returns the
/// removed directories.
pub fn prune_backups(backup_dir: &Path, retention_days: u32) -> Result<Vec<PathBuf>> {
    let cutoff = Utc::now().naive_utc() - chrono::Duration::days(i64::from(retention_days));
    let mut removed = Vec::new();

    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match parse_run_token(&name) {
            Some(stamp) if stamp < cutoff => {
                log::info!("Pruning expired run {}", name);
                std::fs::remove_dir_all(entry.path())?;
                removed.push(entry.path());
            }
            Some(_) => {}
            None => log::warn!(
                "Skipping {} during prune: not a run directory",
                entry.path().display()
            ),
        }
    }

    Ok(removed)
}

/// Run directories under `backup_dir`, newest first.
pub fn list_runs(backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut runs = Vec::new();
    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_dir() && parse_run_token(&name).is_some() {
            runs.push(entry.path());
        }
    }
    runs.sort();
    runs.reverse();
    Ok(runs)
}

/// Most recent encrypted archive of the given format, searching runs
/// newest-first.
pub fn find_latest_archive(backup_dir: &Path, format: ExportFormat) -> Result<PathBuf> {
    let prefix = format!("db-{}-", format.name());
    for run in list_runs(backup_dir)? {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&run)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(&prefix) && name.ends_with(".age"))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        if let Some(found) = candidates.pop() {
            return Ok(found);
        }
    }
    Err(VaultError::NotFound(format!(
        "No {} archive under {}",
        format.name(),
        backup_dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_token() {
        assert!(parse_run_token("20260807-120000").is_some());
        assert!(parse_run_token("not-a-token").is_none());
        assert!(parse_run_token("20261307-120000").is_none());
    }

    #[test]
    fn test_prune_keeps_recent_and_foreign_directories() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("20200101-000000");
        let recent_token = Utc::now().format(TOKEN_FORMAT).to_string();
        let recent = dir.path().join(&recent_token);
        let foreign = dir.path().join("scratch");
        std::fs::create_dir_all(&old).unwrap();
        std::fs::create_dir_all(&recent).unwrap();
        std::fs::create_dir_all(&foreign).unwrap();

        let removed = prune_backups(dir.path(), 30).unwrap();

        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_list_runs_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for token in ["20260101-000000", "20260301-000000", "20260201-000000"] {
            std::fs::create_dir_all(dir.path().join(token)).unwrap();
        }
        let runs = list_runs(dir.path()).unwrap();
        let names: Vec<_> = runs
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["20260301-000000", "20260201-000000", "20260101-000000"]
        );
    }

    #[test]
    fn test_find_latest_archive_scans_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("20260101-000000");
        let newer = dir.path().join("20260201-000000");
        std::fs::create_dir_all(&older).unwrap();
        std::fs::create_dir_all(&newer).unwrap();
        std::fs::write(
            older.join("db-binary-20260101-000000.sqlite3.gz.age"),
            b"old",
        )
        .unwrap();
        // Newest run has no binary archive, so the search falls back.
        std::fs::write(newer.join("db-sql-20260201-000000.sql.gz.age"), b"sql").unwrap();

        let found = find_latest_archive(dir.path(), ExportFormat::Binary).unwrap();
        assert!(found.starts_with(&older));

        let found = find_latest_archive(dir.path(), ExportFormat::SqlDump).unwrap();
        assert!(found.starts_with(&newer));

        assert!(find_latest_archive(dir.path(), ExportFormat::Json).is_err());
    }
}
