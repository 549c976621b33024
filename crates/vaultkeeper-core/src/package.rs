//! Compression and encryption of finished artifacts.
//!
//! Every artifact becomes a single encrypted file: `<name>.gz.age` for
//! plain files, `<name>.tar.gz.age` for directory artifacts. After a
//! successful encryption the plaintext intermediate is securely erased; on
//! failure the partial ciphertext is discarded and the intermediate kept
//! for diagnosis.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::crypto;
use crate::error::{Result, VaultError};
use crate::fs::{remove_path, secure_remove};

/// A finished, encrypted archive.
#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub size: u64,
    /// blake3 digest of the ciphertext, recorded in the manifest.
    pub digest: String,
}

/// Compress and encrypt one artifact, consuming the plaintext on success.
pub fn package_artifact(
    artifact: &Path,
    streaming: bool,
    passphrase: &str,
) -> Result<PackagedArchive> {
    let compressed = if artifact.is_dir() {
        compress_directory(artifact)?
    } else if streaming {
        compress_file_streaming(artifact)?
    } else {
        compress_file_buffered(artifact)?
    };

    let encrypted = encrypt_intermediate(&compressed, streaming, passphrase)?;

    let size = std::fs::metadata(&encrypted)?.len();
    let digest = file_digest(&encrypted)?;

    Ok(PackagedArchive {
        path: encrypted,
        size,
        digest,
    })
}

/// Tar and gzip a directory artifact, removing the directory on success.
fn compress_directory(dir: &Path) -> Result<PathBuf> {
    let output = sibling_with_suffix(dir, ".tar.gz")?;
    let result = (|| -> Result<()> {
        let file = BufWriter::new(File::create(&output)?);
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let root = dir
            .file_name()
            .ok_or_else(|| VaultError::Storage(format!("Invalid directory name: {}", dir.display())))?;
        builder
            .append_dir_all(root, dir)
            .map_err(|e| VaultError::Storage(format!("Tar failed: {}", e)))?;
        builder
            .into_inner()
            .map_err(|e| VaultError::Storage(format!("Tar finish failed: {}", e)))?
            .finish()
            .map_err(|e| VaultError::Storage(format!("Gzip finish failed: {}", e)))?
            .into_inner()
            .map_err(|e| VaultError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            remove_path(dir)?;
            Ok(output)
        }
        Err(e) => {
            let _ = remove_path(&output);
            Err(e)
        }
    }
}

/// Stream-compress a file without buffering it, removing the plaintext as
/// soon as the stream completes.
fn compress_file_streaming(path: &Path) -> Result<PathBuf> {
    let output = sibling_with_suffix(path, ".gz")?;
    let result = (|| -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        let file = BufWriter::new(File::create(&output)?);
        let mut encoder = GzEncoder::new(file, Compression::default());
        io::copy(&mut reader, &mut encoder)
            .map_err(|e| VaultError::Storage(format!("Compression stream failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| VaultError::Storage(format!("Gzip finish failed: {}", e)))?
            .into_inner()
            .map_err(|e| VaultError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            remove_path(path)?;
            Ok(output)
        }
        Err(e) => {
            let _ = remove_path(&output);
            Err(e)
        }
    }
}

/// Whole-buffer compression for hosts with memory to spare.
fn compress_file_buffered(path: &Path) -> Result<PathBuf> {
    let output = sibling_with_suffix(path, ".gz")?;
    let result = (|| -> Result<()> {
        let data = std::fs::read(path)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&data)
            .map_err(|e| VaultError::Storage(format!("Compression failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| VaultError::Storage(format!("Gzip finish failed: {}", e)))?;
        std::fs::write(&output, compressed)?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            remove_path(path)?;
            Ok(output)
        }
        Err(e) => {
            let _ = remove_path(&output);
            Err(e)
        }
    }
}

fn encrypt_intermediate(compressed: &Path, streaming: bool, passphrase: &str) -> Result<PathBuf> {
    let output = sibling_with_suffix(compressed, ".age")?;
    let result = if streaming {
        crypto::encrypt_file(compressed, &output, passphrase).map(|_| ())
    } else {
        std::fs::read(compressed)
            .map_err(VaultError::from)
            .and_then(|data| crypto::encrypt(&data, passphrase))
            .and_then(|encrypted| std::fs::write(&output, encrypted).map_err(VaultError::from))
    };

    match result {
        Ok(()) => {
            // The compressed plaintext must not outlive its ciphertext.
            secure_remove(compressed)?;
            Ok(output)
        }
        Err(e) => {
            let _ = remove_path(&output);
            log::warn!(
                "Encryption failed; keeping {} for diagnosis",
                compressed.display()
            );
            Err(e)
        }
    }
}

/// Decompress a `.gz` file into `destination`.
pub fn decompress_file(source: &Path, destination: &Path) -> Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut output = BufWriter::new(File::create(destination)?);
    let bytes = io::copy(&mut decoder, &mut output)
        .map_err(|e| VaultError::Storage(format!("Decompression failed: {}", e)))?;
    output.flush()?;
    Ok(bytes)
}

/// Unpack a `.tar.gz` into `destination`.
pub fn unpack_tar_gz(source: &Path, destination: &Path) -> Result<()> {
    let decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(destination)
        .map_err(|e| VaultError::Storage(format!("Unpack failed: {}", e)))?;
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> Result<PathBuf> {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    Ok(PathBuf::from(os))
}

fn file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
