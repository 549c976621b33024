//! Schema-only dump: structural definitions and relevant engine pragmas,
//! for structure-only recreation or migration.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;

use crate::error::Result;

use super::open_read_only;

pub fn export_schema_only(source: &Path, destination: &Path) -> Result<()> {
    let conn = open_read_only(source)?;
    let mut out = BufWriter::new(File::create(destination)?);

    writeln!(out, "-- Vaultkeeper schema dump (no data)")?;
    writeln!(out, "-- Engine: SQLite {}", rusqlite::version())?;
    writeln!(out, "-- Created: {}", Utc::now().to_rfc3339())?;
    writeln!(out)?;

    write_pragmas(&conn, &mut out)?;
    writeln!(out)?;

    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
         ORDER BY CASE type
             WHEN 'table' THEN 0
             WHEN 'index' THEN 1
             WHEN 'trigger' THEN 2
             WHEN 'view' THEN 3
             ELSE 4
         END, name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for row in rows {
        writeln!(out, "{};", row?)?;
    }

    out.flush()?;
    Ok(())
}

/// Pragmas worth carrying into a recreated database. Defaults are omitted
/// so the dump only states what differs.
fn write_pragmas(conn: &Connection, out: &mut impl Write) -> Result<()> {
    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version != 0 {
        writeln!(out, "PRAGMA user_version = {};", user_version)?;
    }

    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    if page_size != 4096 {
        writeln!(out, "PRAGMA page_size = {};", page_size)?;
    }

    let auto_vacuum: i64 = conn.query_row("PRAGMA auto_vacuum", [], |row| row.get(0))?;
    if auto_vacuum != 0 {
        writeln!(out, "PRAGMA auto_vacuum = {};", auto_vacuum)?;
    }

    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("delete") {
        writeln!(out, "PRAGMA journal_mode = {};", journal_mode)?;
    }

    Ok(())
}
