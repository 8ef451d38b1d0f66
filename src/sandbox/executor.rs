//! Runs one invocation inside an acquired sandbox under a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Result;
use crate::sandbox::traits::SandboxRuntime;
use crate::sandbox::{ExecOutput, Sandbox};

/// What happened to a single invocation attempt.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The entry process ran to completion (any exit code)
    Completed(ExecOutput),
    /// The wall-clock limit expired and the process was force-killed
    TimedOut { timeout_ms: u64 },
}

pub struct InvocationExecutor {
    runtime: Arc<dyn SandboxRuntime>,
}

impl InvocationExecutor {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { runtime }
    }

    /// Run the artifact's entry process with `payload` on stdin.
    ///
    /// A non-zero exit is a completed outcome, not an error; only
    /// infrastructure faults (engine unreachable) return `Err`. On timeout
    /// the process is force-killed and the sandbox is marked unhealthy so
    /// `release` destroys it instead of recycling; a killed sandbox's
    /// internal state cannot be trusted.
    pub async fn run(
        &self,
        sandbox: &Sandbox,
        payload: Option<&str>,
        wall_clock: Duration,
    ) -> Result<ExecOutcome> {
        debug!(
            sandbox = %sandbox.id(),
            function = %sandbox.artifact().function_name,
            timeout_ms = wall_clock.as_millis() as u64,
            "Executing invocation"
        );

        match timeout(wall_clock, self.runtime.invoke(sandbox.id(), payload)).await {
            Ok(Ok(output)) => {
                let output = ExecOutput {
                    stdout: output.stdout.trim_end().to_string(),
                    stderr: output.stderr.trim_end().to_string(),
                    exit_code: output.exit_code,
                };
                debug!(
                    sandbox = %sandbox.id(),
                    exit_code = output.exit_code,
                    "Invocation completed"
                );
                Ok(ExecOutcome::Completed(output))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let timeout_ms = wall_clock.as_millis() as u64;
                warn!(
                    sandbox = %sandbox.id(),
                    function = %sandbox.artifact().function_name,
                    timeout_ms,
                    "Invocation exceeded wall-clock limit, killing process"
                );
                sandbox.mark_unhealthy();
                if let Err(e) = self.runtime.kill(sandbox.id()).await {
                    warn!(sandbox = %sandbox.id(), error = %e, "Failed to kill timed-out process");
                }
                Ok(ExecOutcome::TimedOut { timeout_ms })
            }
        }
    }
}
