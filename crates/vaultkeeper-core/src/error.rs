//! Error types for Vaultkeeper core operations.
//!
//! This module defines the error hierarchy for the backup and restore
//! pipelines. Errors are descriptive at the core level; the CLI layer maps
//! them to user-friendly messages and exit codes.

use thiserror::Error;

/// Result type alias for Vaultkeeper operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Core error type for Vaultkeeper operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A precondition failed before any work began (insufficient disk
    /// space, missing source database). Nothing has been written.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Encryption or decryption error
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// Wrong passphrase or corrupt archive
    #[error("Incorrect passphrase or corrupt archive")]
    IncorrectPassphrase,

    /// Database engine error
    #[error("Database error: {0}")]
    Database(String),

    /// An operation exceeded its computed timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Artifact verification failed
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Service runtime (container stack) error
    #[error("Service error: {0}")]
    Service(String),

    /// Filesystem or packaging error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found (archive, run directory, manifest)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration or user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}
