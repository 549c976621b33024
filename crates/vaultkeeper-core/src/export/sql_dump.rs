//! Portable transactional SQL dump.
//!
//! The dump loads into any SQLite 3.x with plain `sqlite3 new.db < dump.sql`:
//! foreign keys are disabled for the duration of the load and re-enabled
//! after, and the whole load is one transaction so a partial replay leaves
//! nothing behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::Result;

use super::{open_read_only, quote_identifier, user_tables};

pub fn export_sql_dump(source: &Path, destination: &Path) -> Result<()> {
    let conn = open_read_only(source)?;
    let source_size = std::fs::metadata(source).map(|meta| meta.len()).unwrap_or(0);

    let mut out = BufWriter::new(File::create(destination)?);

    writeln!(out, "-- Vaultkeeper portable SQL dump")?;
    writeln!(out, "-- Engine: SQLite {}", rusqlite::version())?;
    writeln!(out, "-- Created: {}", Utc::now().to_rfc3339())?;
    writeln!(out, "-- Source size: {} bytes", source_size)?;
    writeln!(
        out,
        "-- Load with any SQLite 3.x: sqlite3 restored.db < this-file"
    )?;
    writeln!(out)?;
    writeln!(out, "PRAGMA foreign_keys=OFF;")?;
    writeln!(out, "BEGIN TRANSACTION;")?;

    let tables = user_tables(&conn)?;
    for table in &tables {
        write_table_schema(&conn, table, &mut out)?;
        write_table_rows(&conn, table, &mut out)?;
    }
    write_secondary_objects(&conn, &mut out)?;

    writeln!(out, "COMMIT;")?;
    writeln!(out, "PRAGMA foreign_keys=ON;")?;
    writeln!(out)?;
    writeln!(out, "-- After loading, run: PRAGMA integrity_check;")?;

    out.flush()?;
    Ok(())
}

fn write_table_schema(conn: &Connection, table: &str, out: &mut impl Write) -> Result<()> {
    let sql: String = conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |row| row.get(0),
    )?;
    writeln!(out, "{};", sql)?;
    Ok(())
}

fn write_table_rows(conn: &Connection, table: &str, out: &mut impl Write) -> Result<()> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_identifier(table)))?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let mut literals = Vec::with_capacity(column_count);
        for i in 0..column_count {
            literals.push(sql_literal(row.get_ref(i)?));
        }
        writeln!(
            out,
            "INSERT INTO {} VALUES ({});",
            quote_identifier(table),
            literals.join(",")
        )?;
    }
    Ok(())
}

/// Indexes, triggers, and views come after the data so the load never
/// maintains an index row-by-row.
fn write_secondary_objects(conn: &Connection, out: &mut impl Write) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE type IN ('index', 'trigger', 'view')
           AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
         ORDER BY type, name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for row in rows {
        writeln!(out, "{};", row?)?;
    }
    Ok(())
}

/// Render a column value as a SQL literal.
fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(text) => {
            let text = String::from_utf8_lossy(text);
            format!("'{}'", text.replace('\'', "''"))
        }
        ValueRef::Blob(blob) => {
            let mut hex = String::with_capacity(blob.len() * 2 + 3);
            hex.push_str("X'");
            for byte in blob {
                hex.push_str(&format!("{:02X}", byte));
            }
            hex.push('\'');
            hex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_replays_into_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let dump = dir.path().join("dump.sql");

        let conn = Connection::open(&source).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);
             CREATE TABLE ciphers (id INTEGER PRIMARY KEY, owner INTEGER REFERENCES users(id), secret BLOB, note TEXT);
             CREATE INDEX ciphers_owner ON ciphers(owner);
             INSERT INTO users (email) VALUES ('a@example.com'), ('b@example.com');
             INSERT INTO ciphers (owner, secret, note) VALUES (1, x'deadbeef', 'it''s quoted'), (2, NULL, NULL);",
        )
        .unwrap();
        drop(conn);

        export_sql_dump(&source, &dump).unwrap();

        let replayed = Connection::open_in_memory().unwrap();
        replayed
            .execute_batch(&std::fs::read_to_string(&dump).unwrap())
            .unwrap();

        let users: i64 = replayed
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 2);

        let note: String = replayed
            .query_row("SELECT note FROM ciphers WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(note, "it's quoted");

        let secret: Vec<u8> = replayed
            .query_row("SELECT secret FROM ciphers WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(secret, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_dump_is_transaction_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let dump = dir.path().join("dump.sql");

        let conn = Connection::open(&source).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .unwrap();
        drop(conn);

        export_sql_dump(&source, &dump).unwrap();
        let text = std::fs::read_to_string(&dump).unwrap();

        assert!(text.contains("PRAGMA foreign_keys=OFF;"));
        assert!(text.contains("BEGIN TRANSACTION;"));
        assert!(text.contains("COMMIT;"));
        assert!(text.contains("PRAGMA foreign_keys=ON;"));
        assert!(text.contains("integrity_check"));
        let begin = text.find("BEGIN TRANSACTION").unwrap();
        let create = text.find("CREATE TABLE").unwrap();
        assert!(begin < create);
    }
}
