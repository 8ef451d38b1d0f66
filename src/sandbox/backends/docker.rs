use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::types::RuntimeConfig;
use crate::error::{FuncletError, Result};
use crate::registry::ArtifactRef;
use crate::sandbox::traits::SandboxRuntime;
use crate::sandbox::ExecOutput;

/// Labels applied to every funclet container for tracking
const MANAGED_LABEL: &str = "funclet.managed=true";
const FUNCTION_LABEL: &str = "funclet.function";

/// Container sandbox runtime driving a docker-compatible engine CLI.
///
/// A sandbox is a container created once from the function's image
/// (`create`, the cold start) and re-run per invocation (`start -ai`), so
/// the image's entry command stays the single way into the function while
/// the provisioned container is reused across warm invocations.
pub struct ContainerCliRuntime {
    binary: &'static str,
    enable_networking: bool,
    memory_limit_mb: u64,
}

impl ContainerCliRuntime {
    pub fn new(binary: &'static str, config: &RuntimeConfig) -> Self {
        Self {
            binary,
            enable_networking: config.enable_networking,
            memory_limit_mb: config.memory_limit_mb,
        }
    }

    /// Check if an engine CLI is available on this system.
    ///
    /// Returns true if the engine daemon is accessible.
    pub fn is_available(binary: &str) -> bool {
        match std::process::Command::new(binary)
            .args(["info"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SandboxRuntime for ContainerCliRuntime {
    fn name(&self) -> &str {
        self.binary
    }

    async fn create(&self, artifact: &ArtifactRef) -> Result<String> {
        debug!(image = %artifact.image_id, "Creating sandbox container");

        let mut cmd = Command::new(self.binary);
        cmd.arg("create");

        // Network isolation
        if !self.enable_networking {
            cmd.arg("--network=none");
        }

        // Memory limit
        cmd.arg(format!("--memory={}m", self.memory_limit_mb));

        // Tracking labels
        cmd.args(["--label", MANAGED_LABEL]);
        cmd.arg("--label");
        cmd.arg(format!("{}={}", FUNCTION_LABEL, artifact.function_name));

        // Keep stdin open so invocations can stream a payload in
        cmd.arg("--interactive");

        cmd.arg(&artifact.image_id);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            FuncletError::SandboxCreationFailed(format!("Failed to run {} create: {}", self.binary, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FuncletError::SandboxCreationFailed(format!(
                "{} create failed for image '{}': {}",
                self.binary,
                artifact.image_id,
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(FuncletError::SandboxCreationFailed(format!(
                "{} create returned no container id for image '{}'",
                self.binary, artifact.image_id
            )));
        }

        info!(
            container_id = %container_id,
            image = %artifact.image_id,
            "Sandbox container created"
        );

        Ok(container_id)
    }

    async fn invoke(&self, sandbox_id: &str, payload: Option<&str>) -> Result<ExecOutput> {
        debug!(container_id = %sandbox_id, "Starting entry process");

        let mut cmd = Command::new(self.binary);
        // -a attaches stdout/stderr (demuxed by the CLI), -i streams stdin
        cmd.args(["start", "-ai", sandbox_id]);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            FuncletError::SandboxExec(format!("Failed to run {} start: {}", self.binary, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(payload) = payload {
                stdin.write_all(payload.as_bytes()).await.map_err(|e| {
                    FuncletError::SandboxExec(format!("Failed to write payload: {}", e))
                })?;
            }
            // Dropping closes the pipe so the entry process sees EOF
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            FuncletError::SandboxExec(format!("Failed to wait for {} start: {}", self.binary, e))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(1);

        debug!(
            container_id = %sandbox_id,
            exit_code = exit_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Entry process completed"
        );

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        debug!(container_id = %sandbox_id, "Killing sandbox container");

        let output = Command::new(self.binary)
            .args(["kill", sandbox_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                FuncletError::SandboxExec(format!("Failed to run {} kill: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FuncletError::SandboxExec(format!(
                "{} kill failed for '{}': {}",
                self.binary,
                sandbox_id,
                stderr.trim()
            )));
        }

        Ok(())
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        debug!(container_id = %sandbox_id, "Removing sandbox container");

        let output = Command::new(self.binary)
            .args(["rm", "-f", sandbox_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                FuncletError::SandboxExec(format!("Failed to run {} rm: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FuncletError::SandboxExec(format!(
                "{} rm failed for '{}': {}",
                self.binary,
                sandbox_id,
                stderr.trim()
            )));
        }

        info!(container_id = %sandbox_id, "Sandbox container removed");
        Ok(())
    }
}
