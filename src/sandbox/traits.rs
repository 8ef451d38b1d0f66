use async_trait::async_trait;

use crate::error::Result;
use crate::registry::ArtifactRef;
use crate::sandbox::ExecOutput;

/// Trait for container engine runtimes.
///
/// This trait abstracts the engine driving the sandboxes, allowing different
/// CLIs (docker, podman) to be used interchangeably, and a mock in tests.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Returns the engine name (e.g., "docker", "podman")
    fn name(&self) -> &str;

    /// Create a container for the artifact's image without running it.
    /// Returns the engine's container id. This is the cold-start cost.
    async fn create(&self, artifact: &ArtifactRef) -> Result<String>;

    /// Run the artifact's entry process once inside an existing container,
    /// with `payload` on stdin, and capture its output.
    async fn invoke(&self, sandbox_id: &str, payload: Option<&str>) -> Result<ExecOutput>;

    /// Forcibly terminate the container's running process.
    async fn kill(&self, sandbox_id: &str) -> Result<()>;

    /// Remove the container and any resources it holds.
    async fn destroy(&self, sandbox_id: &str) -> Result<()>;
}
