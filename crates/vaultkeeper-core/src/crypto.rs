//! Age encryption/decryption utilities.
//!
//! Archives are encrypted with Age passphrase-based encryption (scrypt KDF).
//! The passphrase never appears on a command line: callers hand it over as a
//! string slice borrowed from a [`secrecy::SecretString`] that is wiped when
//! dropped.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::iter;
use std::path::Path;

use age::secrecy::SecretString;

use crate::error::{Result, VaultError};

/// Minimum passphrase length in characters.
const MIN_PASSPHRASE_LENGTH: usize = 8;

/// Validate a passphrase meets minimum requirements: non-empty, not only
/// whitespace, at least [`MIN_PASSPHRASE_LENGTH`] characters.
pub fn validate_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "Passphrase cannot be empty".to_string(),
        ));
    }
    if passphrase.len() < MIN_PASSPHRASE_LENGTH {
        return Err(VaultError::InvalidInput(format!(
            "Passphrase must be at least {} characters (got {})",
            MIN_PASSPHRASE_LENGTH,
            passphrase.len()
        )));
    }
    Ok(())
}

/// Encrypt a buffer using Age passphrase-based encryption.
pub fn encrypt(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let encryptor =
        age::Encryptor::with_user_passphrase(SecretString::from(passphrase.to_string()));

    let mut encrypted = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut encrypted)
        .map_err(|e| VaultError::Crypto(format!("Failed to create encryptor: {}", e)))?;

    writer
        .write_all(data)
        .map_err(|e| VaultError::Crypto(format!("Encryption write failed: {}", e)))?;

    writer
        .finish()
        .map_err(|e| VaultError::Crypto(format!("Encryption finish failed: {}", e)))?;

    Ok(encrypted)
}

/// Decrypt a buffer using Age passphrase-based encryption.
///
/// Returns [`VaultError::IncorrectPassphrase`] for a wrong passphrase or a
/// corrupt header, so callers can treat that case as unrecoverable.
pub fn decrypt(encrypted_data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let decryptor = age::Decryptor::new(encrypted_data)
        .map_err(|e| VaultError::Crypto(format!("Failed to create decryptor: {}", e)))?;

    let mut decrypted = Vec::new();

    let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_string()));
    let mut reader = decryptor
        .decrypt(iter::once(&identity as &dyn age::Identity))
        .map_err(map_decrypt_error)?;

    reader
        .read_to_end(&mut decrypted)
        .map_err(|e| VaultError::Crypto(format!("Failed to read decrypted data: {}", e)))?;

    Ok(decrypted)
}

/// Encrypt `source` into `destination`, streaming without buffering the
/// whole plaintext in memory.
pub fn encrypt_file(source: &Path, destination: &Path, passphrase: &str) -> Result<u64> {
    let mut reader = BufReader::new(File::open(source).map_err(|e| {
        VaultError::Storage(format!("Failed to open {}: {}", source.display(), e))
    })?);
    let output = BufWriter::new(File::create(destination).map_err(|e| {
        VaultError::Storage(format!("Failed to create {}: {}", destination.display(), e))
    })?);

    let encryptor =
        age::Encryptor::with_user_passphrase(SecretString::from(passphrase.to_string()));
    let mut writer = encryptor
        .wrap_output(output)
        .map_err(|e| VaultError::Crypto(format!("Failed to create encryptor: {}", e)))?;

    let bytes = io::copy(&mut reader, &mut writer)
        .map_err(|e| VaultError::Crypto(format!("Encryption stream failed: {}", e)))?;

    writer
        .finish()
        .map_err(|e| VaultError::Crypto(format!("Encryption finish failed: {}", e)))?
        .into_inner()
        .map_err(|e| VaultError::Storage(format!("Flush failed: {}", e)))?
        .sync_all()
        .map_err(|e| VaultError::Storage(format!("Sync failed: {}", e)))?;

    Ok(bytes)
}

/// Decrypt `source` into `destination`, streaming.
pub fn decrypt_file(source: &Path, destination: &Path, passphrase: &str) -> Result<u64> {
    let input = BufReader::new(File::open(source).map_err(|e| {
        VaultError::Storage(format!("Failed to open {}: {}", source.display(), e))
    })?);
    let mut output = BufWriter::new(File::create(destination).map_err(|e| {
        VaultError::Storage(format!("Failed to create {}: {}", destination.display(), e))
    })?);

    let decryptor = age::Decryptor::new(input)
        .map_err(|e| VaultError::Crypto(format!("Failed to create decryptor: {}", e)))?;
    let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_string()));
    let mut reader = decryptor
        .decrypt(iter::once(&identity as &dyn age::Identity))
        .map_err(map_decrypt_error)?;

    let bytes = io::copy(&mut reader, &mut output)
        .map_err(|e| VaultError::Crypto(format!("Decryption stream failed: {}", e)))?;
    output
        .flush()
        .map_err(|e| VaultError::Storage(format!("Flush failed: {}", e)))?;

    Ok(bytes)
}

fn map_decrypt_error(e: age::DecryptError) -> VaultError {
    match e {
        age::DecryptError::NoMatchingKeys
        | age::DecryptError::DecryptionFailed
        | age::DecryptError::KeyDecryptionFailed => VaultError::IncorrectPassphrase,
        _ => VaultError::Crypto(format!("Decryption failed: {}", e)),
    }
}
