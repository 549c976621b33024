use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use comfy_table::{presets::UTF8_FULL, Table};
use owo_colors::OwoColorize;
use secrecy::ExposeSecret;

use vaultkeeper_core::backup::list_runs;
use vaultkeeper_core::config::VaultkeeperConfig;
use vaultkeeper_core::export::{ArtifactResult, ExportArtifact, ExportFormat};
use vaultkeeper_core::manifest::{Manifest, MANIFEST_FILE};
use vaultkeeper_core::verify::validate_run;

use crate::app::resolve_passphrase;
use crate::cli::VerifyArgs;

pub fn handle_list(config: &VaultkeeperConfig, quiet: bool) -> anyhow::Result<()> {
    let runs = list_runs(&config.db_backup_dir())?;
    if runs.is_empty() {
        if !quiet {
            println!("No backup runs under {}", config.db_backup_dir().display());
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["RUN", "CREATED", "OK", "FAILED", "VALIDATION"]);

    for run in runs {
        let token = run
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        match Manifest::read(&run.join(MANIFEST_FILE)) {
            Ok(manifest) => {
                let validation = match &manifest.validation {
                    Some(summary) if summary.passed => "passed".to_string(),
                    Some(_) => "failed".to_string(),
                    None => "skipped".to_string(),
                };
                table.add_row(vec![
                    token,
                    manifest.created_at,
                    manifest.succeeded.len().to_string(),
                    manifest.failed.len().to_string(),
                    validation,
                ]);
            }
            Err(_) => {
                table.add_row(vec![
                    token,
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "no manifest".to_string(),
                ]);
            }
        }
    }

    println!("{}", table);
    Ok(())
}

/// Workspace for decrypted copies; removed when the verify finishes.
struct VerifyWorkspace {
    path: PathBuf,
}

impl VerifyWorkspace {
    fn create() -> anyhow::Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow::anyhow!("System time error: {}", e))?
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "vaultkeeper-verify-{}-{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }
}

impl Drop for VerifyWorkspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Decrypt a run's archives into a scratch workspace and re-run the
/// cross-format validation against them.
pub fn handle_verify(
    config: &VaultkeeperConfig,
    args: &VerifyArgs,
    quiet: bool,
) -> anyhow::Result<()> {
    let run_dir = match &args.run {
        Some(token) => {
            let dir = config.db_backup_dir().join(token);
            if !dir.is_dir() {
                anyhow::bail!("Run {} not found under {}", token, config.db_backup_dir().display());
            }
            dir
        }
        None => list_runs(&config.db_backup_dir())?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No backup runs to verify"))?,
    };

    let manifest = Manifest::read(&run_dir.join(MANIFEST_FILE))?;
    let passphrase = resolve_passphrase(config)?;
    let workspace = VerifyWorkspace::create()?;

    let mut artifacts = Vec::new();
    for entry in &manifest.succeeded {
        let Some(format) = ExportFormat::from_name(&entry.format) else {
            log::warn!("Manifest names unknown format {}", entry.format);
            continue;
        };
        let archive = run_dir.join(&entry.file);
        match unpack_archive(&archive, &entry.file, format, &workspace.path, passphrase.expose_secret()) {
            Ok(path) => artifacts.push(ExportArtifact {
                format,
                path,
                result: ArtifactResult::Exported,
            }),
            Err(e) => {
                // An archive that cannot be opened fails its format's check.
                artifacts.push(ExportArtifact {
                    format,
                    path: archive,
                    result: ArtifactResult::Failed(e.to_string()),
                });
                eprintln!("  {} {} ({})", "unreadable".red(), entry.file, e);
            }
        }
    }

    let report = validate_run(&artifacts);
    if !quiet {
        for check in &report.checks {
            if check.passed {
                println!("  {} {}", "ok".green(), check.name);
            } else {
                println!(
                    "  {} {} ({})",
                    "failed".red(),
                    check.name,
                    check.detail.as_deref().unwrap_or("no detail")
                );
            }
        }
    }

    let unreadable = artifacts.iter().any(|artifact| !artifact.is_usable());
    if !report.passed() || unreadable {
        anyhow::bail!("Validation failed for run {}", manifest.run);
    }
    if !quiet {
        println!("Run {} validated", manifest.run);
    }
    Ok(())
}

/// Decrypt (and decompress or unpack) one archive into the workspace,
/// returning the plaintext artifact path.
fn unpack_archive(
    archive: &Path,
    file_name: &str,
    format: ExportFormat,
    workspace: &Path,
    passphrase: &str,
) -> anyhow::Result<PathBuf> {
    if format.is_directory() {
        let tarball = workspace.join(file_name.trim_end_matches(".age"));
        vaultkeeper_core::crypto::decrypt_file(archive, &tarball, passphrase)?;
        vaultkeeper_core::package::unpack_tar_gz(&tarball, workspace)?;
        Ok(workspace.join(file_name.trim_end_matches(".tar.gz.age")))
    } else {
        let gz = workspace.join(file_name.trim_end_matches(".age"));
        vaultkeeper_core::crypto::decrypt_file(archive, &gz, passphrase)?;
        let plain = workspace.join(file_name.trim_end_matches(".gz.age"));
        vaultkeeper_core::package::decompress_file(&gz, &plain)?;
        Ok(plain)
    }
}
