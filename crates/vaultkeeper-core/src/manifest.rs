//! Per-run backup manifest.
//!
//! One `backup-manifest.json` per run directory, recording what the run
//! produced and how to recover from each representation. The manifest is
//! written even when formats failed: it records the state of the world and
//! never blocks on partial failure. It is never mutated afterwards; a new
//! run writes a new manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::export::ExportFormat;
use crate::verify::ValidationReport;

pub const MANIFEST_FILE: &str = "backup-manifest.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: String,
    /// Run token (`%Y%m%d-%H%M%S`).
    pub run: String,
    pub source: SourceInfo,
    /// Encrypted archives that made it to disk, by filename.
    pub succeeded: Vec<ArchiveEntry>,
    /// Formats that failed to export, verify, or package.
    pub failed: Vec<FailedEntry>,
    pub validation: Option<ValidationSummary>,
    /// Literal, copy-pasteable recovery commands per format.
    pub recovery: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceInfo {
    pub size_bytes: u64,
    pub journal_mode: String,
    pub engine_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub format: String,
    pub file: String,
    pub size_bytes: u64,
    pub digest: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailedEntry {
    pub format: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: bool,
    pub checks: Vec<ValidationCheckEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationCheckEntry {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Manifest {
    pub fn new(run: &str, source: SourceInfo) -> Self {
        Self {
            created_at: Utc::now().to_rfc3339(),
            run: run.to_string(),
            source,
            succeeded: Vec::new(),
            failed: Vec::new(),
            validation: None,
            recovery: BTreeMap::new(),
        }
    }

    pub fn record_success(&mut self, format: ExportFormat, file: &str, size: u64, digest: &str) {
        self.recovery
            .insert(format.name().to_string(), recovery_command(format, file));
        self.succeeded.push(ArchiveEntry {
            format: format.name().to_string(),
            file: file.to_string(),
            size_bytes: size,
            digest: digest.to_string(),
        });
    }

    pub fn record_failure(&mut self, format: ExportFormat, reason: &str) {
        self.failed.push(FailedEntry {
            format: format.name().to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn record_validation(&mut self, report: &ValidationReport) {
        self.validation = Some(ValidationSummary {
            passed: report.passed(),
            checks: report
                .checks
                .iter()
                .map(|check| ValidationCheckEntry {
                    name: check.name.clone(),
                    passed: check.passed,
                    detail: check.detail.clone(),
                })
                .collect(),
        });
    }

    /// Write the manifest into its run directory.
    pub fn write(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = run_dir.join(MANIFEST_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| VaultError::Storage(format!("Failed to write manifest: {}", e)))?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VaultError::NotFound(format!("Manifest {}: {}", path.display(), e))
        })?;
        let manifest = serde_json::from_str(&contents)?;
        Ok(manifest)
    }
}

/// The command an operator pastes to recover from one archive.
fn recovery_command(format: ExportFormat, file: &str) -> String {
    match format {
        ExportFormat::Binary | ExportFormat::SqlDump => {
            format!("vaultkeeper restore --archive {}", file)
        }
        ExportFormat::CsvSet => format!(
            "age --decrypt -o {stem} {file} && tar xzf {stem}",
            stem = file.trim_end_matches(".age"),
            file = file
        ),
        ExportFormat::Json | ExportFormat::SchemaOnly => format!(
            "age --decrypt -o {stem}.gz {file} && gunzip {stem}.gz",
            stem = file.trim_end_matches(".gz.age"),
            file = file
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip_with_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new(
            "20260807-120000",
            SourceInfo {
                size_bytes: 52_428_800,
                journal_mode: "wal".to_string(),
                engine_version: "3.45.0".to_string(),
            },
        );
        manifest.record_success(
            ExportFormat::Binary,
            "db-binary-20260807-120000.sqlite3.gz.age",
            1024,
            "blake3:abc",
        );
        manifest.record_failure(ExportFormat::Json, "disk full");

        let path = manifest.write(dir.path()).unwrap();
        let loaded = Manifest::read(&path).unwrap();

        assert_eq!(loaded.run, "20260807-120000");
        assert_eq!(loaded.source.journal_mode, "wal");
        assert_eq!(loaded.succeeded.len(), 1);
        assert_eq!(loaded.failed.len(), 1);
        assert_eq!(loaded.failed[0].format, "json");
        assert!(loaded.recovery["binary"].contains("vaultkeeper restore"));
    }

    #[test]
    fn test_recovery_commands_are_literal() {
        let cmd = recovery_command(ExportFormat::CsvSet, "db-csv-x.tar.gz.age");
        assert_eq!(
            cmd,
            "age --decrypt -o db-csv-x.tar.gz db-csv-x.tar.gz.age && tar xzf db-csv-x.tar.gz"
        );
    }
}
