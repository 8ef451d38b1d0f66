//! Scriptable in-memory `SandboxRuntime` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FuncletError, Result};
use crate::registry::ArtifactRef;
use crate::sandbox::traits::SandboxRuntime;
use crate::sandbox::ExecOutput;

#[derive(Debug, Clone, Default)]
struct MockBehavior {
    stdout: String,
    stderr: String,
    exit_code: i32,
    /// Simulated entry-process runtime
    invoke_delay: Option<Duration>,
    /// Simulated cold-start latency
    create_delay: Option<Duration>,
    fail_create: bool,
    fail_invoke: bool,
}

/// Mock engine with per-image scripted behavior and lifecycle counters.
#[derive(Default)]
pub struct MockRuntime {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    /// Live container id -> image id
    live: Mutex<HashMap<String, String>>,
    last_payload: Mutex<Option<String>>,
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    invokes: AtomicU64,
    kills: AtomicU64,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_behavior(&self, image: &str, f: impl FnOnce(&mut MockBehavior)) {
        let mut behaviors = self.behaviors.lock().unwrap();
        f(behaviors.entry(image.to_string()).or_default());
    }

    pub fn set_output(&self, image: &str, stdout: &str, stderr: &str, exit_code: i32) {
        self.with_behavior(image, |b| {
            b.stdout = stdout.to_string();
            b.stderr = stderr.to_string();
            b.exit_code = exit_code;
        });
    }

    pub fn set_delay(&self, image: &str, delay: Duration) {
        self.with_behavior(image, |b| b.invoke_delay = Some(delay));
    }

    pub fn set_create_delay(&self, image: &str, delay: Duration) {
        self.with_behavior(image, |b| b.create_delay = Some(delay));
    }

    pub fn fail_create(&self, image: &str) {
        self.with_behavior(image, |b| b.fail_create = true);
    }

    pub fn fail_invoke(&self, image: &str) {
        self.with_behavior(image, |b| b.fail_invoke = true);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn invokes(&self) -> u64 {
        self.invokes.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> u64 {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Option<String> {
        self.last_payload.lock().unwrap().clone()
    }

    fn behavior_for(&self, image: &str) -> MockBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_default()
    }

    fn image_of(&self, sandbox_id: &str) -> Result<String> {
        self.live
            .lock()
            .unwrap()
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| {
                FuncletError::SandboxExec(format!("no such mock container: {}", sandbox_id))
            })
    }
}

#[async_trait]
impl SandboxRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(&self, artifact: &ArtifactRef) -> Result<String> {
        let behavior = self.behavior_for(&artifact.image_id);
        if let Some(delay) = behavior.create_delay {
            tokio::time::sleep(delay).await;
        }
        if behavior.fail_create {
            return Err(FuncletError::SandboxCreationFailed(format!(
                "mock create failure for image '{}'",
                artifact.image_id
            )));
        }

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live
            .lock()
            .unwrap()
            .insert(id.clone(), artifact.image_id.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn invoke(&self, sandbox_id: &str, payload: Option<&str>) -> Result<ExecOutput> {
        let image = self.image_of(sandbox_id)?;
        let behavior = self.behavior_for(&image);

        self.invokes.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().unwrap() = payload.map(str::to_string);

        if let Some(delay) = behavior.invoke_delay {
            tokio::time::sleep(delay).await;
        }
        if behavior.fail_invoke {
            return Err(FuncletError::SandboxExec(format!(
                "mock invoke failure for image '{}'",
                image
            )));
        }

        Ok(ExecOutput {
            stdout: behavior.stdout,
            stderr: behavior.stderr,
            exit_code: behavior.exit_code,
        })
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        self.image_of(sandbox_id)?;
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, sandbox_id: &str) -> Result<()> {
        self.live.lock().unwrap().remove(sandbox_id);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
