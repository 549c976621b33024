//! Backup passphrase retrieval.
//!
//! The passphrase is fetched from an explicit value, the environment, or a
//! passphrase file, in that order, and held in a [`SecretString`] so it is
//! wiped from memory when dropped. It is never placed on a command line.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::crypto::validate_passphrase;
use crate::error::{Result, VaultError};

/// Environment variable consulted before the passphrase file.
pub const PASSPHRASE_ENV: &str = "VAULTKEEPER_PASSPHRASE";

const FETCH_RETRIES: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(500);

/// Where a passphrase may come from, tried in order.
#[derive(Debug, Default)]
pub struct PassphraseSource {
    /// Explicit value (tests, already-prompted CLI input).
    pub explicit: Option<SecretString>,
    /// Passphrase file from configuration.
    pub file: Option<PathBuf>,
}

impl PassphraseSource {
    pub fn from_file(path: Option<PathBuf>) -> Self {
        Self {
            explicit: None,
            file: path,
        }
    }

    /// Resolve the passphrase, validating it before returning.
    ///
    /// File reads are retried a bounded number of times with fixed backoff;
    /// a secret store mounted late (network filesystem, tmpfs populated by
    /// an init container) settles within the retry budget or not at all.
    pub fn resolve(self) -> Result<SecretString> {
        if let Some(secret) = self.explicit {
            validate_passphrase(secret.expose_secret())?;
            return Ok(secret);
        }

        if let Ok(mut value) = std::env::var(PASSPHRASE_ENV) {
            if !value.trim().is_empty() {
                let secret = SecretString::from(value.trim_end_matches('\n').to_string());
                value.zeroize();
                validate_passphrase(secret.expose_secret())?;
                return Ok(secret);
            }
        }

        if let Some(path) = self.file {
            let secret = read_passphrase_file(&path)?;
            validate_passphrase(secret.expose_secret())?;
            return Ok(secret);
        }

        Err(VaultError::NotFound(format!(
            "No passphrase available: set {} or configure security.passphrase_file",
            PASSPHRASE_ENV
        )))
    }
}

fn read_passphrase_file(path: &Path) -> Result<SecretString> {
    let mut last_err = None;
    for attempt in 0..FETCH_RETRIES {
        match std::fs::read_to_string(path) {
            Ok(mut contents) => {
                let secret = SecretString::from(contents.trim_end_matches('\n').to_string());
                contents.zeroize();
                return Ok(secret);
            }
            Err(e) => {
                if attempt + 1 < FETCH_RETRIES {
                    log::warn!(
                        "Passphrase file {} unreadable (attempt {}/{}): {}",
                        path.display(),
                        attempt + 1,
                        FETCH_RETRIES,
                        e
                    );
                    thread::sleep(FETCH_BACKOFF);
                }
                last_err = Some(e);
            }
        }
    }
    Err(VaultError::Storage(format!(
        "Failed to read passphrase file {}: {}",
        path.display(),
        last_err.expect("retry loop records an error")
    )))
}
