//! Per-table CSV export for spreadsheet and ad-hoc recovery.
//!
//! Not a full-fidelity restore path: blobs are base64-encoded and type
//! information lives only in the sibling `tables.json` manifest.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

use super::{open_read_only, quote_identifier, user_tables};

/// Sibling manifest describing the exported tables.
#[derive(Debug, Serialize, Deserialize)]
pub struct CsvSetManifest {
    pub created_at: String,
    pub encoding: String,
    pub header_row: bool,
    pub blob_encoding: String,
    pub tables: Vec<CsvTableEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CsvTableEntry {
    pub name: String,
    pub rows: u64,
}

pub fn export_csv_set(source: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;
    let conn = open_read_only(source)?;

    let mut exported = Vec::new();
    for table in user_tables(&conn)? {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(&table)),
            [],
            |row| row.get(0),
        )?;
        if count == 0 {
            log::debug!("Skipping empty table {}", table);
            continue;
        }

        write_table_csv(&conn, &table, &destination.join(format!("{}.csv", table)))?;
        exported.push(CsvTableEntry {
            name: table,
            rows: count as u64,
        });
    }

    let manifest = CsvSetManifest {
        created_at: Utc::now().to_rfc3339(),
        encoding: "utf-8".to_string(),
        header_row: true,
        blob_encoding: "base64".to_string(),
        tables: exported,
    };
    let manifest_path = destination.join("tables.json");
    let contents = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, contents)?;

    Ok(())
}

fn write_table_csv(conn: &Connection, table: &str, path: &Path) -> Result<()> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_identifier(table)))?;
    let headers: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| VaultError::Storage(format!("Failed to create {}: {}", path.display(), e)))?;
    writer
        .write_record(&headers)
        .map_err(|e| VaultError::Storage(format!("CSV header write failed: {}", e)))?;

    let column_count = headers.len();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(column_count);
        for i in 0..column_count {
            record.push(csv_field(row.get_ref(i)?));
        }
        writer
            .write_record(&record)
            .map_err(|e| VaultError::Storage(format!("CSV row write failed: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| VaultError::Storage(format!("CSV flush failed: {}", e)))?;
    Ok(())
}

fn csv_field(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(blob) => BASE64.encode(blob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports_non_empty_tables_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let out = dir.path().join("db-csv");

        let conn = Connection::open(&source).unwrap();
        conn.execute_batch(
            "CREATE TABLE folders (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE empty_table (id INTEGER PRIMARY KEY);
             INSERT INTO folders (name) VALUES ('work'), ('personal');",
        )
        .unwrap();
        drop(conn);

        export_csv_set(&source, &out).unwrap();

        assert!(out.join("folders.csv").exists());
        assert!(!out.join("empty_table.csv").exists());

        let manifest: CsvSetManifest =
            serde_json::from_str(&fs::read_to_string(out.join("tables.json")).unwrap()).unwrap();
        assert_eq!(manifest.tables.len(), 1);
        assert_eq!(manifest.tables[0].name, "folders");
        assert_eq!(manifest.tables[0].rows, 2);
        assert!(manifest.header_row);

        let csv_text = fs::read_to_string(out.join("folders.csv")).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next(), Some("id,name"));
        assert_eq!(lines.next(), Some("1,work"));
    }

    #[test]
    fn test_all_empty_database_still_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let out = dir.path().join("db-csv");

        let conn = Connection::open(&source).unwrap();
        conn.execute_batch("CREATE TABLE only_empty (id INTEGER PRIMARY KEY);")
            .unwrap();
        drop(conn);

        export_csv_set(&source, &out).unwrap();

        let manifest: CsvSetManifest =
            serde_json::from_str(&fs::read_to_string(out.join("tables.json")).unwrap()).unwrap();
        assert!(manifest.tables.is_empty());
    }
}
