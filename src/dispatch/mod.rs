//! Public entry point: validates requests, applies admission control, and
//! routes each invocation through the pool and executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::types::{DispatcherConfig, OverflowPolicy};
use crate::registry::{ArtifactRegistry, Language};
use crate::sandbox::{ExecOutcome, ExecOutput, InvocationExecutor, SandboxPool, SandboxRuntime};

/// One request to run a packaged function. Immutable; passed by value.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub function_name: String,
    /// Raw language tag; validated by the dispatcher, not the caller
    pub language: String,
    /// Wall-clock limit; the configured default applies when unset
    pub timeout_ms: Option<u64>,
    /// Delivered to the entry process on stdin
    pub input_payload: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Failed,
    TimedOut,
    Rejected,
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationStatus::Success => "success",
            InvocationStatus::Failed => "failed",
            InvocationStatus::TimedOut => "timed_out",
            InvocationStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The single structured result every invocation produces, whatever its fate.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub status: InvocationStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    /// Human-readable rejection/failure reason, when there is one
    pub message: Option<String>,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Success
    }

    fn completed(output: ExecOutput, elapsed: Duration) -> Self {
        let status = if output.exit_code == 0 {
            InvocationStatus::Success
        } else {
            InvocationStatus::Failed
        };
        Self {
            status,
            stdout: non_empty(output.stdout),
            stderr: non_empty(output.stderr),
            exit_code: Some(output.exit_code),
            elapsed_ms: elapsed.as_millis() as u64,
            message: None,
        }
    }

    fn timed_out(timeout_ms: u64, elapsed: Duration) -> Self {
        Self {
            status: InvocationStatus::TimedOut,
            stdout: None,
            stderr: None,
            exit_code: None,
            elapsed_ms: elapsed.as_millis() as u64,
            message: Some(format!(
                "Function exceeded timeout of {}ms",
                timeout_ms
            )),
        }
    }

    fn rejected(message: String, elapsed: Duration) -> Self {
        Self {
            status: InvocationStatus::Rejected,
            stdout: None,
            stderr: None,
            exit_code: None,
            elapsed_ms: elapsed.as_millis() as u64,
            message: Some(message),
        }
    }

    fn failed(message: String, elapsed: Duration) -> Self {
        Self {
            status: InvocationStatus::Failed,
            stdout: None,
            stderr: None,
            exit_code: None,
            elapsed_ms: elapsed.as_millis() as u64,
            message: Some(message),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub struct Dispatcher {
    registry: Arc<dyn ArtifactRegistry>,
    pool: Arc<SandboxPool>,
    executor: InvocationExecutor,
    admission: Arc<Semaphore>,
    waiting: AtomicUsize,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn ArtifactRegistry>,
        runtime: Arc<dyn SandboxRuntime>,
        pool: Arc<SandboxPool>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            executor: InvocationExecutor::new(runtime),
            admission: Arc::new(Semaphore::new(config.max_concurrent_invocations)),
            waiting: AtomicUsize::new(0),
            config,
        }
    }

    /// Run one invocation end to end.
    ///
    /// Every path returns a fully-populated result; validation failures and
    /// capacity conditions never touch the pool, and an acquired sandbox is
    /// released exactly once even when the executor faults.
    pub async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        let started = Instant::now();
        info!(
            function = %request.function_name,
            language = %request.language,
            "Invocation received"
        );

        let language = match request.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                debug!(language = %request.language, "Rejecting unsupported language");
                return InvocationResult::rejected(e.to_string(), started.elapsed());
            }
        };

        let artifact = match self
            .registry
            .resolve(&request.function_name, language)
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                debug!(function = %request.function_name, "Rejecting unknown function");
                return InvocationResult::rejected(e.to_string(), started.elapsed());
            }
        };

        // Global admission control; the permit spans pool acquisition and
        // execution so at most max_concurrent_invocations run at once
        let _slot = match self.admit().await {
            Some(permit) => permit,
            None => {
                return InvocationResult::rejected(
                    format!(
                        "invocation capacity exhausted (limit {}, queue depth {})",
                        self.config.max_concurrent_invocations, self.config.admission_queue_depth
                    ),
                    started.elapsed(),
                );
            }
        };

        let sandbox = match self.pool.acquire(&artifact).await {
            Ok(sandbox) => sandbox,
            Err(e) if e.is_retryable() => {
                warn!(image = %artifact.image_id, error = %e, "Sandbox acquisition rejected");
                return InvocationResult::rejected(e.to_string(), started.elapsed());
            }
            Err(e) => {
                warn!(image = %artifact.image_id, error = %e, "Sandbox acquisition failed");
                return InvocationResult::failed(e.to_string(), started.elapsed());
            }
        };

        let wall_clock = Duration::from_millis(
            request.timeout_ms.unwrap_or(self.config.default_timeout_ms),
        );
        let outcome = self
            .executor
            .run(&sandbox, request.input_payload.as_deref(), wall_clock)
            .await;

        let (healthy, result) = match outcome {
            Ok(ExecOutcome::Completed(output)) => {
                (true, InvocationResult::completed(output, started.elapsed()))
            }
            Ok(ExecOutcome::TimedOut { timeout_ms }) => (
                false,
                InvocationResult::timed_out(timeout_ms, started.elapsed()),
            ),
            Err(e) => {
                warn!(sandbox = %sandbox.id(), error = %e, "Executor fault");
                (false, InvocationResult::failed(e.to_string(), started.elapsed()))
            }
        };

        // The one release for this acquire, on every path above
        self.pool.release(sandbox, healthy).await;
        result
    }

    async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => match self.config.overflow {
                OverflowPolicy::Reject => {
                    debug!("At concurrency limit, rejecting");
                    None
                }
                OverflowPolicy::Queue => {
                    let waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
                    if waiting >= self.config.admission_queue_depth {
                        self.waiting.fetch_sub(1, Ordering::SeqCst);
                        debug!("Admission queue full, rejecting");
                        return None;
                    }
                    let _guard = WaitGuard(&self.waiting);
                    debug!(waiting = waiting + 1, "Queued for an execution slot");
                    Arc::clone(&self.admission).acquire_owned().await.ok()
                }
            },
        }
    }
}

/// Decrements the waiter count even if the queued request is dropped.
struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PoolConfig;
    use crate::registry::StaticRegistry;
    use crate::sandbox::testing::MockRuntime;

    struct Harness {
        runtime: Arc<MockRuntime>,
        pool: Arc<SandboxPool>,
        dispatcher: Dispatcher,
    }

    fn harness(dispatcher_config: DispatcherConfig) -> Harness {
        harness_with(dispatcher_config, PoolConfig::default(), true)
    }

    fn harness_with(
        dispatcher_config: DispatcherConfig,
        pool_config: PoolConfig,
        convention_images: bool,
    ) -> Harness {
        let runtime = Arc::new(MockRuntime::new());
        let pool = SandboxPool::new(runtime.clone(), pool_config);
        let registry = Arc::new(StaticRegistry::new(convention_images));
        let dispatcher = Dispatcher::new(
            registry,
            runtime.clone() as Arc<dyn SandboxRuntime>,
            Arc::clone(&pool),
            dispatcher_config,
        );
        Harness {
            runtime,
            pool,
            dispatcher,
        }
    }

    fn request(function: &str, language: &str, timeout_ms: Option<u64>) -> InvocationRequest {
        InvocationRequest {
            function_name: function.to_string(),
            language: language.to_string(),
            timeout_ms,
            input_payload: None,
        }
    }

    #[tokio::test]
    async fn test_unsupported_language_rejected_without_pool_work() {
        let h = harness(DispatcherConfig::default());

        let result = h.dispatcher.invoke(request("greet", "ruby", None)).await;

        assert_eq!(result.status, InvocationStatus::Rejected);
        assert!(result.message.as_deref().unwrap().contains("Unsupported language"));
        assert_eq!(h.pool.counters().acquires(), 0);
        assert_eq!(h.runtime.created(), 0);
    }

    #[tokio::test]
    async fn test_unknown_function_rejected() {
        let h = harness_with(
            DispatcherConfig::default(),
            PoolConfig::default(),
            false,
        );

        let result = h.dispatcher.invoke(request("ghost", "python", None)).await;

        assert_eq!(result.status, InvocationStatus::Rejected);
        assert!(result.message.as_deref().unwrap().contains("not registered"));
        assert_eq!(h.pool.counters().acquires(), 0);
    }

    #[tokio::test]
    async fn test_hello_world_invocation() {
        let h = harness(DispatcherConfig::default());
        h.runtime.set_output(
            "example_function_python",
            "Hello from example_function!\n",
            "",
            0,
        );

        let result = h
            .dispatcher
            .invoke(request("example_function", "python", Some(5000)))
            .await;

        assert_eq!(result.status, InvocationStatus::Success);
        assert_eq!(result.stdout.as_deref(), Some("Hello from example_function!"));
        assert_eq!(result.exit_code, Some(0));
        assert!(result.is_success());
        assert_eq!(h.runtime.invokes(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let h = harness(DispatcherConfig::default());
        h.runtime
            .set_output("crash_python", "", "Traceback: boom\n", 3);

        let result = h.dispatcher.invoke(request("crash", "python", None)).await;

        assert_eq!(result.status, InvocationStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr.as_deref(), Some("Traceback: boom"));
        // Runtime failure is not an infrastructure fault; sandbox is recycled
        assert_eq!(h.pool.warm_count("crash_python").await, 1);
    }

    #[tokio::test]
    async fn test_timeout_discards_sandbox() {
        let h = harness(DispatcherConfig::default());
        h.runtime
            .set_delay("sleepy_python", Duration::from_millis(500));

        let result = h
            .dispatcher
            .invoke(request("sleepy", "python", Some(20)))
            .await;

        assert_eq!(result.status, InvocationStatus::TimedOut);
        assert_eq!(result.stdout, None);
        assert_eq!(result.exit_code, None);
        assert_eq!(h.runtime.destroyed(), 1);
        assert_eq!(h.pool.warm_count("sleepy_python").await, 0);

        // The next invocation cold-starts a fresh sandbox, never the killed one
        h.runtime.set_delay("sleepy_python", Duration::ZERO);
        let result = h.dispatcher.invoke(request("sleepy", "python", None)).await;
        assert_eq!(result.status, InvocationStatus::Success);
        assert_eq!(h.pool.counters().cold_starts(), 2);
    }

    #[tokio::test]
    async fn test_executor_fault_still_releases_once() {
        let h = harness(DispatcherConfig::default());
        h.runtime.fail_invoke("broken_python");

        let result = h.dispatcher.invoke(request("broken", "python", None)).await;

        assert_eq!(result.status, InvocationStatus::Failed);
        assert!(result.message.as_deref().unwrap().contains("mock invoke failure"));
        assert_eq!(h.pool.counters().acquires(), 1);
        assert_eq!(h.pool.counters().releases(), 1);
        assert_eq!(h.runtime.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_rejected() {
        let pool_config = PoolConfig {
            per_artifact_cap: 1,
            admission_wait_ms: 30,
            ..PoolConfig::default()
        };
        let h = harness_with(DispatcherConfig::default(), pool_config, true);
        h.runtime
            .set_delay("greet_python", Duration::from_millis(300));

        let (busy, starved) = tokio::join!(
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
        );

        assert_eq!(busy.status, InvocationStatus::Success);
        assert_eq!(starved.status, InvocationStatus::Rejected);
        assert!(starved.message.as_deref().unwrap().contains("pool exhausted"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrency_limit_reject_policy() {
        let config = DispatcherConfig {
            max_concurrent_invocations: 1,
            overflow: OverflowPolicy::Reject,
            ..DispatcherConfig::default()
        };
        let h = harness(config);
        h.runtime
            .set_delay("greet_python", Duration::from_millis(200));

        let (a, b) = tokio::join!(
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
        );

        let statuses = [a.status, b.status];
        assert!(statuses.contains(&InvocationStatus::Success));
        assert!(statuses.contains(&InvocationStatus::Rejected));
        // The rejected request never reached the pool
        assert_eq!(h.pool.counters().acquires(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_limit_queue_policy() {
        let config = DispatcherConfig {
            max_concurrent_invocations: 1,
            admission_queue_depth: 1,
            overflow: OverflowPolicy::Queue,
            ..DispatcherConfig::default()
        };
        let h = harness(config);
        h.runtime
            .set_delay("greet_python", Duration::from_millis(100));

        let (a, b, c) = tokio::join!(
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
            h.dispatcher.invoke(request("greet", "python", Some(2000))),
        );

        let statuses = [a.status, b.status, c.status];
        let successes = statuses
            .iter()
            .filter(|s| **s == InvocationStatus::Success)
            .count();
        let rejections = statuses
            .iter()
            .filter(|s| **s == InvocationStatus::Rejected)
            .count();
        // One runs, one queues and then runs, the third overflows the queue
        assert_eq!(successes, 2);
        assert_eq!(rejections, 1);
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let config = DispatcherConfig {
            default_timeout_ms: 20,
            ..DispatcherConfig::default()
        };
        let h = harness(config);
        h.runtime
            .set_delay("sleepy_python", Duration::from_millis(300));

        let result = h.dispatcher.invoke(request("sleepy", "python", None)).await;
        assert_eq!(result.status, InvocationStatus::TimedOut);
        assert!(result
            .message
            .as_deref()
            .unwrap()
            .contains("timeout of 20ms"));
    }

    #[tokio::test]
    async fn test_payload_forwarded() {
        let h = harness(DispatcherConfig::default());
        h.runtime.set_output("echo_python", "ok", "", 0);

        let mut req = request("echo", "python", None);
        req.input_payload = Some("{\"k\":\"v\"}".to_string());
        let result = h.dispatcher.invoke(req).await;

        assert_eq!(result.status, InvocationStatus::Success);
        assert_eq!(h.runtime.last_payload().as_deref(), Some("{\"k\":\"v\"}"));
    }
}
