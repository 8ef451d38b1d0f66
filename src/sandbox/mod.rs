mod backends;
mod factory;
mod traits;

pub mod executor;
pub mod pool;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;

use crate::registry::ArtifactRef;

pub use backends::ContainerCliRuntime;
pub use executor::{ExecOutcome, InvocationExecutor};
pub use factory::{available_engines, create_runtime, EngineInfo};
pub use pool::{PoolCounters, SandboxPool};
pub use traits::SandboxRuntime;

/// Output of one run of an artifact's entry process.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Created but never run
    Cold,
    /// Idle and reusable
    Warm,
    /// Executing exactly one invocation
    Busy,
    /// Scheduled for destruction
    Draining,
}

/// An execution sandbox handle.
///
/// Owned by the pool; callers only ever hold one between `acquire` and
/// `release`, and never two for the same underlying container.
pub struct Sandbox {
    id: String,
    artifact: ArtifactRef,
    state: SandboxState,
    last_used_at: Instant,
    /// Set when the sandbox's internal state can no longer be trusted
    /// (e.g. its process was force-killed at timeout)
    tainted: AtomicBool,
    /// Per-artifact capacity permit, held while Busy
    permit: Option<OwnedSemaphorePermit>,
}

impl Sandbox {
    pub(crate) fn new(id: String, artifact: ArtifactRef, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            artifact,
            state: SandboxState::Cold,
            last_used_at: Instant::now(),
            tainted: AtomicBool::new(false),
            permit: Some(permit),
        }
    }

    /// Opaque sandbox identifier (the engine's container id).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SandboxState) {
        self.state = state;
    }

    pub(crate) fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn attach_permit(&mut self, permit: OwnedSemaphorePermit) {
        self.permit = Some(permit);
    }

    pub(crate) fn take_permit(&mut self) -> Option<OwnedSemaphorePermit> {
        self.permit.take()
    }

    /// Mark the sandbox as unreliable; `release` will destroy it.
    pub fn mark_unhealthy(&self) {
        self.tainted.store(true, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        !self.tainted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("image", &self.artifact.image_id)
            .field("state", &self.state)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
