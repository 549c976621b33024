//! Pre-flight resource inspection and timeout budgeting.
//!
//! A backup run materializes several uncompressed representations of the
//! database at once, so disk headroom is a hard precondition while memory
//! and CPU pressure merely select gentler strategies downstream.

use std::path::Path;
use std::time::Duration;

use sysinfo::{Disks, System};

use crate::error::{Result, VaultError};

/// Free space required at the destination, as a multiple of database size:
/// multiple simultaneous uncompressed formats plus compressed and encrypted
/// outputs.
pub const REQUIRED_SPACE_FACTOR: u64 = 4;

const MB: u64 = 1024 * 1024;
const MIN_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Advisory flags handed to later pipeline stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceProfile {
    /// Compress by streaming source to destination instead of buffering the
    /// whole artifact in memory.
    pub streaming: bool,
    /// Step long database operations gently (smaller batches, pauses).
    pub low_priority: bool,
}

/// Point-in-time view of the host, separable from `sysinfo` for testing.
#[derive(Debug, Clone, Copy)]
pub struct SystemSnapshot {
    /// Free bytes on the filesystem holding the backup destination.
    pub available_space: u64,
    /// Free bytes of memory.
    pub available_memory: u64,
    /// One-minute load average.
    pub load_average: f64,
    /// Logical core count.
    pub cpu_count: usize,
}

impl SystemSnapshot {
    /// Collect a snapshot for the given backup destination.
    pub fn collect(destination: &Path) -> Result<Self> {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        let available_space = destination_free_space(destination)?;
        let cpu_count = sys.cpus().len().max(1);

        Ok(Self {
            available_space,
            available_memory: sys.available_memory(),
            load_average: System::load_average().one,
            cpu_count,
        })
    }
}

/// Verify the destination has room for the run and derive the advisory
/// resource profile.
///
/// Insufficient disk space is fatal: partial writes under disk exhaustion
/// corrupt output silently, so the run must not start.
pub fn check_preconditions(snapshot: &SystemSnapshot, db_size: u64) -> Result<ResourceProfile> {
    let required = db_size.saturating_mul(REQUIRED_SPACE_FACTOR);
    if snapshot.available_space < required {
        return Err(VaultError::Precondition(format!(
            "Insufficient disk space: {} bytes available, {} required ({}x database size)",
            snapshot.available_space, required, REQUIRED_SPACE_FACTOR
        )));
    }

    let streaming = snapshot.available_memory < db_size / 4;
    let low_priority = snapshot.load_average > 2.0 * snapshot.cpu_count as f64;

    if streaming {
        log::info!(
            "Low memory ({} bytes free): using streaming compression",
            snapshot.available_memory
        );
    }
    if low_priority {
        log::info!(
            "High load ({:.2} on {} cores): stepping database operations gently",
            snapshot.load_average,
            snapshot.cpu_count
        );
    }

    Ok(ResourceProfile {
        streaming,
        low_priority,
    })
}

/// Operation timeout proportional to data volume.
///
/// Base 30s, plus 1s per 100MB of database and 1s per 50MB of write-ahead
/// log, clamped to [30s, 600s].
pub fn backup_timeout(db_size: u64, wal_size: u64) -> Duration {
    let secs = 30 + db_size / (100 * MB) + wal_size / (50 * MB);
    Duration::from_secs(secs).clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

fn destination_free_space(destination: &Path) -> Result<u64> {
    // The destination may not exist yet; resolve the nearest existing
    // ancestor so the mount lookup has a real path to work with.
    let mut probe = destination;
    while !probe.exists() {
        probe = probe
            .parent()
            .ok_or_else(|| {
                VaultError::Precondition(format!(
                    "Backup destination {} has no existing ancestor",
                    destination.display()
                ))
            })?;
    }
    let resolved = probe
        .canonicalize()
        .map_err(|e| VaultError::Storage(format!("Failed to resolve {}: {}", probe.display(), e)))?;

    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .iter()
        .filter(|disk| resolved.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match best {
        Some(disk) => Ok(disk.available_space()),
        None => {
            // Some container environments report no mounts; skip the check
            // rather than fail a run the operator asked for.
            log::warn!(
                "No disk found for {}; skipping free-space check",
                resolved.display()
            );
            Ok(u64::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(space: u64, memory: u64, load: f64, cpus: usize) -> SystemSnapshot {
        SystemSnapshot {
            available_space: space,
            available_memory: memory,
            load_average: load,
            cpu_count: cpus,
        }
    }

    #[test]
    fn test_insufficient_space_is_fatal() {
        let snap = snapshot(100 * MB, 8 * 1024 * MB, 0.5, 4);
        let result = check_preconditions(&snap, 50 * MB);
        assert!(matches!(result, Err(VaultError::Precondition(_))));
    }

    #[test]
    fn test_exactly_enough_space_passes() {
        let snap = snapshot(200 * MB, 8 * 1024 * MB, 0.5, 4);
        let profile = check_preconditions(&snap, 50 * MB).unwrap();
        assert!(!profile.streaming);
        assert!(!profile.low_priority);
    }

    #[test]
    fn test_low_memory_sets_streaming() {
        let snap = snapshot(u64::MAX, 10 * MB, 0.5, 4);
        let profile = check_preconditions(&snap, 100 * MB).unwrap();
        assert!(profile.streaming);
    }

    #[test]
    fn test_high_load_sets_low_priority() {
        let snap = snapshot(u64::MAX, 8 * 1024 * MB, 9.0, 4);
        let profile = check_preconditions(&snap, 10 * MB).unwrap();
        assert!(profile.low_priority);
    }

    #[test]
    fn test_timeout_bounds() {
        assert_eq!(backup_timeout(0, 0), Duration::from_secs(30));
        assert_eq!(backup_timeout(50 * MB, 20 * MB), Duration::from_secs(30));
        assert_eq!(backup_timeout(1000 * MB, 0), Duration::from_secs(40));
        assert_eq!(backup_timeout(500 * MB, 100 * MB), Duration::from_secs(37));
        // Clamped at ten minutes no matter the size.
        assert_eq!(
            backup_timeout(1024 * 1024 * MB, 1024 * MB),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_timeout_monotone_in_size() {
        let sizes = [0, 10 * MB, 100 * MB, 999 * MB, 10_000 * MB, 100_000 * MB];
        let mut last = Duration::ZERO;
        for size in sizes {
            let t = backup_timeout(size, 0);
            assert!(t >= last, "timeout decreased at size {}", size);
            assert!(t >= MIN_TIMEOUT && t <= MAX_TIMEOUT);
            last = t;
        }
    }
}
