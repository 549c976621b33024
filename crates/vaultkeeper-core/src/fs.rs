//! Filesystem utilities for atomic installs and secure deletion.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, VaultError};

/// Atomically rename a file, with fallback for platforms where rename fails
/// if the target exists.
///
/// On some platforms (notably Windows), `fs::rename` fails if the destination
/// already exists. This function handles that case by removing the
/// destination first and retrying.
///
/// If the rename ultimately fails, the temp file is cleaned up.
pub fn rename_with_fallback(temp_path: &Path, destination: &Path) -> io::Result<()> {
    if let Err(initial_err) = fs::rename(temp_path, destination) {
        // Best-effort replace on platforms where rename fails if target exists.
        let _ = fs::remove_file(destination);
        fs::rename(temp_path, destination).map_err(|retry_err| {
            // Clean up the temp file on failure
            let _ = fs::remove_file(temp_path);
            io::Error::new(
                retry_err.kind(),
                format!(
                    "Atomic rename failed (initial: {}, retry: {})",
                    initial_err, retry_err
                ),
            )
        })?;
    }
    Ok(())
}

/// Build a uniquely-named temporary sibling of `path`.
///
/// Interrupted runs may leave temporaries behind; names carry the process id
/// and a nanosecond stamp so later runs never collide with them.
pub fn unique_temp_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| VaultError::Storage(format!("{} has no parent directory", path.display())))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| VaultError::Storage(format!("Invalid filename: {}", path.display())))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| VaultError::Storage(format!("System time error: {}", e)))?
        .as_nanos();
    Ok(parent.join(format!(
        ".{}.{}.{}.{}",
        filename,
        std::process::id(),
        nanos,
        suffix
    )))
}

/// Overwrite a file with zeros, sync, then delete it.
///
/// Falls back to a plain delete if the overwrite fails (read-only filesystem,
/// concurrent removal). Returns an error only if the file still exists
/// afterwards.
pub fn secure_remove(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) => {
            let len = meta.len();
            let overwritten = fs::OpenOptions::new().write(true).open(path).and_then(|mut file| {
                let zeros = vec![0u8; 64 * 1024];
                let mut remaining = len;
                while remaining > 0 {
                    let chunk = remaining.min(zeros.len() as u64) as usize;
                    file.write_all(&zeros[..chunk])?;
                    remaining -= chunk as u64;
                }
                file.sync_all()
            });
            if let Err(e) = overwritten {
                log::warn!(
                    "Could not overwrite {} before delete: {}",
                    path.display(),
                    e
                );
            }
            fs::remove_file(path)
                .map_err(|e| VaultError::Storage(format!("Failed to delete {}: {}", path.display(), e)))
        }
        // Already gone; nothing to erase.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::Storage(format!(
            "Failed to stat {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Remove a file or directory tree, ignoring a missing target.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::Storage(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
