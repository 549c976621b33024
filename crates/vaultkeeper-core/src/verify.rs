//! Artifact verification.
//!
//! The binary snapshot is verified immediately after export: engine
//! self-consistency plus a table-count and sampled row-count cross-check
//! against the source. A snapshot that fails is discarded rather than
//! packaged. The remaining formats are validated once per run by the
//! cross-format pass.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, VaultError};
use crate::export::{ArtifactResult, ExportArtifact, ExportFormat};

/// Run the engine's self-consistency check against a database file.
pub fn integrity_check(database: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(database, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    integrity_check_conn(&conn)
}

fn integrity_check_conn(conn: &Connection) -> Result<()> {
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if verdict != "ok" {
        return Err(VaultError::Verification(format!(
            "integrity_check reported: {}",
            verdict
        )));
    }
    Ok(())
}

fn user_table_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn first_user_table(conn: &Connection) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;
    let name = conn
        .query_row(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name)
}

fn table_row_count(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {}",
            crate::export::quote_identifier(table)
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Verify a binary snapshot: self-consistency, then a cross-check of table
/// count and one sampled table's row count against the source.
pub fn verify_binary(artifact: &Path, source: Option<&Path>) -> Result<()> {
    let artifact_conn = Connection::open_with_flags(artifact, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    integrity_check_conn(&artifact_conn)?;

    let Some(source) = source else {
        return Ok(());
    };
    let source_conn = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let source_tables = user_table_count(&source_conn)?;
    let artifact_tables = user_table_count(&artifact_conn)?;
    if source_tables != artifact_tables {
        return Err(VaultError::Verification(format!(
            "Table count mismatch: source has {}, snapshot has {}",
            source_tables, artifact_tables
        )));
    }

    if let Some(table) = first_user_table(&source_conn)? {
        let source_rows = table_row_count(&source_conn, &table)?;
        let artifact_rows = table_row_count(&artifact_conn, &table)?;
        if source_rows != artifact_rows {
            return Err(VaultError::Verification(format!(
                "Row count mismatch in {}: source has {}, snapshot has {}",
                table, source_rows, artifact_rows
            )));
        }
    }

    Ok(())
}

/// Verify exported artifacts in place, discarding any that fail.
///
/// Only the binary format is verified here; a rejected snapshot is removed
/// from disk and counted among the failed formats.
pub fn verify_artifacts(artifacts: &mut [ExportArtifact], source: &Path) {
    for artifact in artifacts.iter_mut() {
        if artifact.format != ExportFormat::Binary || !artifact.is_usable() {
            continue;
        }
        if let Err(e) = verify_binary(&artifact.path, Some(source)) {
            log::warn!("Binary snapshot rejected: {}", e);
            let _ = crate::fs::remove_path(&artifact.path);
            artifact.result = ArtifactResult::Rejected(e.to_string());
        }
    }
}

/// One independent check of the cross-format validation pass.
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

impl ValidationCheck {
    fn passed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    fn failed(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: Some(detail),
        }
    }
}

/// Result of the once-per-run cross-format validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Passed only if every applicable check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }
}

/// Cross-format validation: trial-restore the SQL dump into a scratch
/// database, parse the JSON export, self-check the binary snapshot, and
/// confirm the CSV set produced files. Checks are independent; a format
/// that was not produced is simply not checked.
pub fn validate_run(artifacts: &[ExportArtifact]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for artifact in artifacts {
        if !artifact.is_usable() {
            continue;
        }
        let check = match artifact.format {
            ExportFormat::SqlDump => trial_restore_dump(&artifact.path),
            ExportFormat::Json => parse_json_export(&artifact.path),
            ExportFormat::Binary => match verify_binary(&artifact.path, None) {
                Ok(()) => ValidationCheck::passed("binary-self-check"),
                Err(e) => ValidationCheck::failed("binary-self-check", e.to_string()),
            },
            ExportFormat::CsvSet => csv_set_has_files(&artifact.path),
            ExportFormat::SchemaOnly => continue,
        };
        if !check.passed {
            log::warn!(
                "Validation check {} failed: {}",
                check.name,
                check.detail.as_deref().unwrap_or("no detail")
            );
        }
        report.checks.push(check);
    }

    report
}

fn trial_restore_dump(dump: &Path) -> ValidationCheck {
    const NAME: &str = "sql-dump-trial-restore";
    let replay = || -> Result<()> {
        let text = std::fs::read_to_string(dump)?;
        let scratch = Connection::open_in_memory()?;
        scratch
            .execute_batch(&text)
            .map_err(|e| VaultError::Verification(format!("Dump replay failed: {}", e)))?;
        integrity_check_conn(&scratch)
    };
    match replay() {
        Ok(()) => ValidationCheck::passed(NAME),
        Err(e) => ValidationCheck::failed(NAME, e.to_string()),
    }
}

fn parse_json_export(path: &Path) -> ValidationCheck {
    const NAME: &str = "json-well-formed";
    let parse = || -> Result<()> {
        let file = std::fs::File::open(path)?;
        let value: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(file))?;
        if value.get("schema").is_none() || value.get("data").is_none() {
            return Err(VaultError::Verification(
                "JSON export missing schema or data section".to_string(),
            ));
        }
        Ok(())
    };
    match parse() {
        Ok(()) => ValidationCheck::passed(NAME),
        Err(e) => ValidationCheck::failed(NAME, e.to_string()),
    }
}

fn csv_set_has_files(dir: &Path) -> ValidationCheck {
    const NAME: &str = "csv-set-non-empty";
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            if entries.count() > 0 {
                ValidationCheck::passed(NAME)
            } else {
                ValidationCheck::failed(NAME, "CSV set directory is empty".to_string())
            }
        }
        Err(e) => ValidationCheck::failed(NAME, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportSettings, run_exporters};
    use crate::resources::ResourceProfile;
    use std::time::Duration;

    fn seeded_database(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT);
             INSERT INTO accounts (email) VALUES ('a@x'), ('b@x'), ('c@x');",
        )
        .unwrap();
    }

    #[test]
    fn test_verify_binary_accepts_faithful_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let copy = dir.path().join("copy.sqlite3");
        seeded_database(&source);
        std::fs::copy(&source, &copy).unwrap();

        verify_binary(&copy, Some(&source)).unwrap();
    }

    #[test]
    fn test_verify_binary_rejects_row_count_drift() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let copy = dir.path().join("copy.sqlite3");
        seeded_database(&source);
        std::fs::copy(&source, &copy).unwrap();

        // Drift the snapshot's sampled table.
        Connection::open(&copy)
            .unwrap()
            .execute("DELETE FROM accounts WHERE id = 1", [])
            .unwrap();

        let result = verify_binary(&copy, Some(&source));
        assert!(matches!(result, Err(VaultError::Verification(_))));
    }

    #[test]
    fn test_validate_run_full_pass() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let run_dir = dir.path().join("run");
        std::fs::create_dir_all(&run_dir).unwrap();
        seeded_database(&source);

        let settings = ExportSettings {
            timeout: Duration::from_secs(30),
            profile: ResourceProfile::default(),
        };
        let artifacts = run_exporters(&source, &run_dir, "20260807-120000", &settings);
        assert!(artifacts.iter().all(|a| a.is_usable()));

        let report = validate_run(&artifacts);
        assert!(report.passed(), "checks: {:?}", report.checks);
        // Binary, dump, csv, json each contribute one check.
        assert_eq!(report.checks.len(), 4);
    }

    #[test]
    fn test_validate_run_flags_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("db-json-x.json");
        std::fs::write(&json, "{ not json").unwrap();

        let artifacts = vec![ExportArtifact {
            format: ExportFormat::Json,
            path: json,
            result: ArtifactResult::Exported,
        }];
        let report = validate_run(&artifacts);
        assert!(!report.passed());
    }
}
