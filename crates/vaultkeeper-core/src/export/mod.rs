//! The five backup representations.
//!
//! Every exporter reads the same prepared source file and writes to its own
//! distinct output path; none mutates the source, and each is idempotent
//! and order-independent. One exporter's failure never blocks the others:
//! the pipeline records the failure and moves on.

mod binary;
mod csv_set;
mod json_export;
mod schema_only;
mod sql_dump;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::Result;
use crate::resources::ResourceProfile;

pub use binary::export_binary;
pub use csv_set::export_csv_set;
pub use json_export::export_json;
pub use schema_only::export_schema_only;
pub use sql_dump::export_sql_dump;

/// The fixed set of backup representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// Byte-identical, directly restorable database file.
    Binary,
    /// Portable transactional statement dump.
    SqlDump,
    /// Per-table CSV directory for spreadsheet or ad-hoc recovery.
    CsvSet,
    /// Structured schema+data document.
    Json,
    /// Structural definitions only.
    SchemaOnly,
}

impl ExportFormat {
    pub fn all() -> [ExportFormat; 5] {
        [
            ExportFormat::Binary,
            ExportFormat::SqlDump,
            ExportFormat::CsvSet,
            ExportFormat::Json,
            ExportFormat::SchemaOnly,
        ]
    }

    /// Short name used in filenames and the manifest.
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Binary => "binary",
            ExportFormat::SqlDump => "sql",
            ExportFormat::CsvSet => "csv",
            ExportFormat::Json => "json",
            ExportFormat::SchemaOnly => "schema",
        }
    }

    pub fn from_name(name: &str) -> Option<ExportFormat> {
        match name {
            "binary" => Some(ExportFormat::Binary),
            "sql" => Some(ExportFormat::SqlDump),
            "csv" => Some(ExportFormat::CsvSet),
            "json" => Some(ExportFormat::Json),
            "schema" => Some(ExportFormat::SchemaOnly),
            _ => None,
        }
    }

    /// Output filename for a run token, following the
    /// `db-<format>-<timestamp>.<ext>` contract.
    pub fn file_name(&self, token: &str) -> String {
        match self {
            ExportFormat::Binary => format!("db-binary-{}.sqlite3", token),
            ExportFormat::SqlDump => format!("db-sql-{}.sql", token),
            ExportFormat::CsvSet => format!("db-csv-{}", token),
            ExportFormat::Json => format!("db-json-{}.json", token),
            ExportFormat::SchemaOnly => format!("db-schema-{}.sql", token),
        }
    }

    /// The CSV set is a directory; everything else is a single file.
    pub fn is_directory(&self) -> bool {
        matches!(self, ExportFormat::CsvSet)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one exporter, carried through verification and packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactResult {
    /// Export completed; artifact is on disk.
    Exported,
    /// Export failed; no usable artifact.
    Failed(String),
    /// Export completed but verification rejected the artifact.
    Rejected(String),
}

/// One produced (or attempted) backup representation.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub result: ArtifactResult,
}

impl ExportArtifact {
    pub fn is_usable(&self) -> bool {
        self.result == ArtifactResult::Exported
    }
}

/// Settings shared by the exporters for one run.
#[derive(Debug, Clone, Copy)]
pub struct ExportSettings {
    pub timeout: Duration,
    pub profile: ResourceProfile,
}

/// Run all five exporters against `source`, writing into `run_dir`.
///
/// Failures are isolated per format: a failing exporter yields a `Failed`
/// artifact and its partial output is removed, while the rest proceed.
pub fn run_exporters(
    source: &Path,
    run_dir: &Path,
    token: &str,
    settings: &ExportSettings,
) -> Vec<ExportArtifact> {
    let mut artifacts = Vec::with_capacity(5);

    for format in ExportFormat::all() {
        let path = run_dir.join(format.file_name(token));
        log::info!("Exporting {} to {}", format, path.display());

        let outcome = match format {
            ExportFormat::Binary => export_binary(
                source,
                &path,
                settings.timeout,
                settings.profile.low_priority,
            ),
            ExportFormat::SqlDump => export_sql_dump(source, &path),
            ExportFormat::CsvSet => export_csv_set(source, &path),
            ExportFormat::Json => export_json(source, &path),
            ExportFormat::SchemaOnly => export_schema_only(source, &path),
        };

        let result = match outcome {
            Ok(()) => ArtifactResult::Exported,
            Err(e) => {
                log::warn!("{} export failed: {}", format, e);
                // Never leave a half-written artifact where a restore
                // could find it.
                let _ = crate::fs::remove_path(&path);
                ArtifactResult::Failed(e.to_string())
            }
        };

        artifacts.push(ExportArtifact {
            format,
            path,
            result,
        });
    }

    artifacts
}

/// Open a read-only connection to the source database.
pub(crate) fn open_read_only(source: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Names of user-defined tables, system tables excluded.
pub(crate) fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut tables = Vec::new();
    for row in rows {
        tables.push(row?);
    }
    Ok(tables)
}

/// Quote an identifier for use in generated SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
