//! Binary snapshot via the engine's online-backup API.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::backup::{Backup, StepResult};
use rusqlite::Connection;

use crate::error::{Result, VaultError};

const PAGES_PER_STEP: std::os::raw::c_int = 512;
const GENTLE_PAGES_PER_STEP: std::os::raw::c_int = 64;
const BUSY_RETRY_PAUSE: Duration = Duration::from_millis(100);
const GENTLE_STEP_PAUSE: Duration = Duration::from_millis(25);

/// Produce a byte-identical, directly restorable copy of the database.
///
/// The copy runs inside an immediate-mode transaction on the source so no
/// concurrent writer can interleave with the snapshot, stepped in page
/// batches so the deadline can cut a runaway copy short. With `low_priority`
/// set, batches shrink and a pause separates them.
pub fn export_binary(
    source: &Path,
    destination: &Path,
    timeout: Duration,
    low_priority: bool,
) -> Result<()> {
    let src = Connection::open(source)?;
    src.busy_timeout(timeout)?;
    let mut dst = Connection::open(destination)?;

    src.execute_batch("BEGIN IMMEDIATE")?;
    let copied = run_backup(&src, &mut dst, timeout, low_priority);
    // Release the write lock whether or not the copy succeeded.
    let released = src.execute_batch("COMMIT");

    copied?;
    released?;
    Ok(())
}

fn run_backup(
    src: &Connection,
    dst: &mut Connection,
    timeout: Duration,
    low_priority: bool,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let pages = if low_priority {
        GENTLE_PAGES_PER_STEP
    } else {
        PAGES_PER_STEP
    };

    let backup = Backup::new(src, dst)?;
    loop {
        match backup.step(pages)? {
            StepResult::Done => return Ok(()),
            StepResult::More => {
                if low_priority {
                    thread::sleep(GENTLE_STEP_PAUSE);
                }
            }
            StepResult::Busy | StepResult::Locked => {
                thread::sleep(BUSY_RETRY_PAUSE);
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            return Err(VaultError::Timeout(format!(
                "Online backup exceeded {}s budget",
                timeout.as_secs()
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_database(path: &Path, rows: usize) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ciphers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, data BLOB);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO ciphers (name, data) VALUES (?, ?)",
                (format!("entry-{}", i), vec![i as u8; 32]),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_snapshot_is_restorable_and_identical() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let snapshot = dir.path().join("db-binary.sqlite3");
        seeded_database(&source, 50);

        export_binary(&source, &snapshot, Duration::from_secs(30), false).unwrap();

        let copy = Connection::open(&snapshot).unwrap();
        let rows: i64 = copy
            .query_row("SELECT COUNT(*) FROM ciphers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 50);

        let ok: String = copy
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ok, "ok");
    }

    #[test]
    fn test_source_unchanged_after_export() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("db.sqlite3");
        let snapshot = dir.path().join("snap.sqlite3");
        seeded_database(&source, 10);
        let before = std::fs::read(&source).unwrap();

        export_binary(&source, &snapshot, Duration::from_secs(30), true).unwrap();

        assert_eq!(std::fs::read(&source).unwrap(), before);
    }
}
