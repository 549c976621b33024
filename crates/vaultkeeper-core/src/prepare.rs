//! Source preparation before export.
//!
//! A WAL-mode database under write load can carry a large write-ahead log;
//! checkpointing it first gives every exporter a compact, consistent base
//! file to read. Checkpoint failure is never fatal: a slower backup beats an
//! aborted one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// WAL size above which a checkpoint is forced before export.
pub const CHECKPOINT_THRESHOLD: u64 = 100 * 1024 * 1024;

/// What the preparer observed about the source database.
#[derive(Debug, Clone)]
pub struct PreparedSource {
    /// Journal mode as reported by the engine (`wal`, `delete`, ...).
    pub journal_mode: String,
    /// Size of the `-wal` sibling file in bytes, zero if absent.
    pub wal_size: u64,
    /// Whether a checkpoint was issued and completed.
    pub checkpointed: bool,
}

impl PreparedSource {
    pub fn is_wal(&self) -> bool {
        self.journal_mode.eq_ignore_ascii_case("wal")
    }
}

/// Path of the write-ahead log sibling for a database file.
pub fn wal_path(database: &Path) -> PathBuf {
    let mut os = database.as_os_str().to_os_string();
    os.push("-wal");
    PathBuf::from(os)
}

/// Size of the write-ahead log, zero when the file does not exist.
pub fn wal_size(database: &Path) -> u64 {
    std::fs::metadata(wal_path(database))
        .map(|meta| meta.len())
        .unwrap_or(0)
}

/// Inspect the journal mode and, if the WAL has grown past the threshold,
/// force a truncating checkpoint bounded by `timeout`.
pub fn prepare_source(database: &Path, timeout: Duration) -> Result<PreparedSource> {
    let conn = Connection::open(database)?;
    conn.busy_timeout(timeout)?;

    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let size = wal_size(database);

    let mut prepared = PreparedSource {
        journal_mode,
        wal_size: size,
        checkpointed: false,
    };

    if !prepared.is_wal() {
        log::debug!("Journal mode is {}; no checkpoint needed", prepared.journal_mode);
        return Ok(prepared);
    }

    if size <= CHECKPOINT_THRESHOLD {
        log::debug!(
            "WAL is {} bytes (threshold {}); skipping checkpoint",
            size,
            CHECKPOINT_THRESHOLD
        );
        return Ok(prepared);
    }

    log::info!("WAL is {} bytes; forcing truncating checkpoint", size);
    match conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
        row.get::<_, i64>(0)
    }) {
        Ok(0) => {
            prepared.checkpointed = true;
            prepared.wal_size = wal_size(database);
        }
        Ok(busy) => {
            log::warn!(
                "Checkpoint did not complete (busy={}); proceeding with uncheckpointed WAL",
                busy
            );
        }
        Err(e) => {
            log::warn!("Checkpoint failed: {}; proceeding with uncheckpointed WAL", e);
        }
    }

    Ok(prepared)
}
