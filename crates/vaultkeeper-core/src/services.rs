//! Container stack control.
//!
//! The restore path never touches a database file a running process may
//! hold open, so it needs exactly four operations from the runtime: bring
//! the stack up, take it down, read one container's health, list what is
//! running. Everything else about the container runtime is out of scope.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{Result, VaultError};

/// Reported health of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Starting,
    /// Not running, or the runtime could not say.
    Unknown,
}

/// The narrow interface the restore orchestrator depends on.
pub trait ServiceRuntime {
    fn stack_up(&self) -> Result<()>;
    fn stack_down(&self) -> Result<()>;
    fn container_health(&self, name: &str) -> Result<HealthState>;
    fn list_running(&self) -> Result<Vec<String>>;
}

/// `docker compose` backed runtime.
pub struct ComposeRuntime {
    compose_dir: PathBuf,
}

impl ComposeRuntime {
    pub fn new(compose_dir: PathBuf) -> Self {
        Self { compose_dir }
    }

    fn compose_command(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .arg("compose")
            .args(args)
            .current_dir(&self.compose_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| VaultError::Service(format!("Failed to execute docker compose: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VaultError::Service(format!(
                "docker compose {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl ServiceRuntime for ComposeRuntime {
    fn stack_up(&self) -> Result<()> {
        log::info!("Bringing service stack up");
        self.compose_command(&["up", "-d"])?;
        Ok(())
    }

    fn stack_down(&self) -> Result<()> {
        log::info!("Taking service stack down");
        self.compose_command(&["down"])?;
        Ok(())
    }

    fn container_health(&self, name: &str) -> Result<HealthState> {
        let output = Command::new("docker")
            .args([
                "inspect",
                "--format",
                "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}",
                name,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| VaultError::Service(format!("Failed to execute docker inspect: {}", e)))?;

        if !output.status.success() {
            // Container not found yet; the poller treats this as not-ready.
            return Ok(HealthState::Unknown);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_health(stdout.trim()))
    }

    fn list_running(&self) -> Result<Vec<String>> {
        let output = self.compose_command(&["ps", "--services", "--status", "running"])?;
        Ok(output
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}

/// Parse `<status>|<health>` from docker inspect. A running container with
/// no healthcheck counts as healthy; only an explicit `unhealthy` verdict
/// (or a non-running container) fails the gate.
fn parse_health(line: &str) -> HealthState {
    let (status, health) = match line.split_once('|') {
        Some(parts) => parts,
        None => (line, ""),
    };

    if status != "running" {
        return HealthState::Unknown;
    }
    match health {
        "" | "healthy" => HealthState::Healthy,
        "starting" => HealthState::Starting,
        "unhealthy" => HealthState::Unhealthy,
        _ => HealthState::Unknown,
    }
}
