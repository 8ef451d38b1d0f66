//! Warm sandbox pool with per-artifact capacity caps and idle eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::types::PoolConfig;
use crate::error::{FuncletError, Result};
use crate::registry::ArtifactRef;
use crate::sandbox::traits::SandboxRuntime;
use crate::sandbox::{Sandbox, SandboxState};

/// Per-artifact pool entry: the capacity gate plus parked warm sandboxes.
struct ArtifactSlot {
    /// Caps concurrently acquired (Busy) sandboxes for this artifact
    capacity: Arc<Semaphore>,
    /// Idle sandboxes, most recently used at the back
    warm: VecDeque<Sandbox>,
}

/// Sandbox lifecycle counters, exposed so callers and tests can assert on
/// pool behavior without reaching into its state.
#[derive(Debug, Default)]
pub struct PoolCounters {
    acquires: AtomicU64,
    cold_starts: AtomicU64,
    warm_hits: AtomicU64,
    releases: AtomicU64,
    evictions: AtomicU64,
    destroys: AtomicU64,
}

impl PoolCounters {
    pub fn acquires(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn cold_starts(&self) -> u64 {
        self.cold_starts.load(Ordering::SeqCst)
    }

    pub fn warm_hits(&self) -> u64 {
        self.warm_hits.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> u64 {
        self.destroys.load(Ordering::SeqCst)
    }
}

/// Manages the bounded set of warm/cold sandboxes per artifact.
///
/// All sandbox state lives behind the pool; callers only hold the opaque
/// handle between `acquire` and `release`.
pub struct SandboxPool {
    runtime: Arc<dyn SandboxRuntime>,
    config: PoolConfig,
    slots: Mutex<HashMap<String, ArtifactSlot>>,
    counters: PoolCounters,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SandboxPool {
    /// Create a pool without the background sweeper (callers must run
    /// `sweep_idle` themselves; used by tests).
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            config,
            slots: Mutex::new(HashMap::new()),
            counters: PoolCounters::default(),
            sweeper: std::sync::Mutex::new(None),
        })
    }

    /// Create a pool and start its background eviction sweep.
    pub fn start(runtime: Arc<dyn SandboxRuntime>, config: PoolConfig) -> Arc<Self> {
        let pool = Self::new(runtime, config);
        let handle = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_millis(pool.config.sweep_interval_ms));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    pool.sweep_idle().await;
                }
            })
        };
        if let Ok(mut slot) = pool.sweeper.lock() {
            *slot = Some(handle);
        }
        pool
    }

    pub fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Number of warm sandboxes currently parked for an image.
    pub async fn warm_count(&self, image_id: &str) -> usize {
        let slots = self.slots.lock().await;
        slots.get(image_id).map_or(0, |slot| slot.warm.len())
    }

    /// Acquire a sandbox for the artifact, reusing a warm one when possible.
    ///
    /// Blocks up to `admission_wait_ms` for a capacity slot, then up to
    /// `creation_timeout_ms` for a cold start. The returned sandbox is Busy
    /// and must be handed back via `release` exactly once.
    pub async fn acquire(&self, artifact: &ArtifactRef) -> Result<Sandbox> {
        let capacity = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .entry(artifact.image_id.clone())
                .or_insert_with(|| ArtifactSlot {
                    capacity: Arc::new(Semaphore::new(self.config.per_artifact_cap)),
                    warm: VecDeque::new(),
                });
            Arc::clone(&slot.capacity)
        };

        let wait = Duration::from_millis(self.config.admission_wait_ms);
        let permit = match timeout(wait, capacity.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(FuncletError::SandboxCreationFailed(
                    "sandbox pool is shut down".to_string(),
                ))
            }
            Err(_) => {
                debug!(image = %artifact.image_id, "Capacity wait expired");
                return Err(FuncletError::PoolExhausted {
                    image: artifact.image_id.clone(),
                    waited_ms: self.config.admission_wait_ms,
                });
            }
        };

        // Warm hit
        {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(&artifact.image_id) {
                if let Some(mut sandbox) = slot.warm.pop_front() {
                    sandbox.set_state(SandboxState::Busy);
                    sandbox.attach_permit(permit);
                    self.counters.acquires.fetch_add(1, Ordering::SeqCst);
                    self.counters.warm_hits.fetch_add(1, Ordering::SeqCst);
                    debug!(sandbox = %sandbox.id(), image = %artifact.image_id, "Warm sandbox acquired");
                    return Ok(sandbox);
                }
            }
        }

        // Cold start
        let creation_timeout = Duration::from_millis(self.config.creation_timeout_ms);
        let id = match timeout(creation_timeout, self.runtime.create(artifact)).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(image = %artifact.image_id, timeout_ms = self.config.creation_timeout_ms, "Cold start timed out");
                return Err(FuncletError::SandboxCreationTimeout {
                    image: artifact.image_id.clone(),
                    timeout_ms: self.config.creation_timeout_ms,
                });
            }
        };

        let mut sandbox = Sandbox::new(id, artifact.clone(), permit);
        sandbox.set_state(SandboxState::Busy);
        self.counters.acquires.fetch_add(1, Ordering::SeqCst);
        self.counters.cold_starts.fetch_add(1, Ordering::SeqCst);
        debug!(sandbox = %sandbox.id(), image = %artifact.image_id, "Cold sandbox acquired");
        Ok(sandbox)
    }

    /// Return a sandbox to the pool.
    ///
    /// Healthy sandboxes go back Warm; unhealthy (or tainted) ones are
    /// destroyed. Destruction failures are logged rather than surfaced so a
    /// release can never mask the invocation's own outcome.
    pub async fn release(&self, mut sandbox: Sandbox, healthy: bool) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);

        if healthy && sandbox.is_healthy() {
            let image = sandbox.artifact().image_id.clone();
            sandbox.set_state(SandboxState::Warm);
            sandbox.touch();
            let permit = sandbox.take_permit();

            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots.get_mut(&image) {
                debug!(sandbox = %sandbox.id(), image = %image, "Sandbox returned to warm pool");
                slot.warm.push_back(sandbox);
                drop(slots);
                // Capacity frees only once the warm sandbox is visible, so a
                // woken waiter always finds it instead of cold-starting
                drop(permit);
                return;
            }
            // Slot gone (pool shut down underneath us); destroy instead
        }

        sandbox.set_state(SandboxState::Draining);
        debug!(sandbox = %sandbox.id(), "Releasing unhealthy sandbox for destruction");
        self.destroy_sandbox(sandbox).await;
    }

    /// Destroy warm sandboxes idle longer than the configured TTL.
    ///
    /// Runs on the sweeper interval; callable directly as well.
    pub async fn sweep_idle(&self) {
        let ttl = Duration::from_millis(self.config.idle_ttl_ms);
        let mut expired = Vec::new();

        {
            let mut slots = self.slots.lock().await;
            for slot in slots.values_mut() {
                let mut kept = VecDeque::new();
                while let Some(sandbox) = slot.warm.pop_front() {
                    if sandbox.last_used_at().elapsed() >= ttl {
                        expired.push(sandbox);
                    } else {
                        kept.push_back(sandbox);
                    }
                }
                slot.warm = kept;
            }
        }

        if expired.is_empty() {
            return;
        }

        info!(count = expired.len(), "Evicting idle sandboxes");
        for mut sandbox in expired {
            sandbox.set_state(SandboxState::Draining);
            self.counters.evictions.fetch_add(1, Ordering::SeqCst);
            self.destroy_sandbox(sandbox).await;
        }
    }

    /// Stop the sweeper and destroy every remaining warm sandbox.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }

        let drained: Vec<Sandbox> = {
            let mut slots = self.slots.lock().await;
            slots
                .drain()
                .flat_map(|(_, slot)| slot.warm.into_iter())
                .collect()
        };

        if !drained.is_empty() {
            info!(count = drained.len(), "Destroying warm sandboxes on shutdown");
        }
        for mut sandbox in drained {
            sandbox.set_state(SandboxState::Draining);
            self.destroy_sandbox(sandbox).await;
        }
    }

    async fn destroy_sandbox(&self, mut sandbox: Sandbox) {
        if let Err(e) = self.runtime.destroy(sandbox.id()).await {
            warn!(sandbox = %sandbox.id(), error = %e, "Failed to destroy sandbox");
        }
        self.counters.destroys.fetch_add(1, Ordering::SeqCst);
        // Capacity frees once destruction has actually happened
        drop(sandbox.take_permit());
    }
}
