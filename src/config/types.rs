use serde::{Deserialize, Serialize};

use crate::registry::Language;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FuncletConfig {
    pub dispatcher: DispatcherConfig,
    pub pool: PoolConfig,
    pub runtime: RuntimeConfig,
    /// Registered functions ([[functions]] tables)
    pub functions: Vec<FunctionEntry>,
}

/// A function registered in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    pub language: Language,
    /// Image id; defaults to the `<name>_<language>` packaging convention
    pub image: Option<String>,
}

impl FunctionEntry {
    pub fn image_id(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.name, self.language))
    }
}

/// Admission-control behavior when the global concurrency limit is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for a slot, bounded by the admission queue depth
    #[default]
    Queue,
    /// Reject over-limit requests immediately
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum invocations executing at once
    pub max_concurrent_invocations: usize,
    /// Maximum requests waiting for an execution slot (queue policy only)
    pub admission_queue_depth: usize,
    /// What to do with over-limit requests
    pub overflow: OverflowPolicy,
    /// Wall-clock timeout applied when the request does not carry one
    pub default_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 8,
            admission_queue_depth: 16,
            overflow: OverflowPolicy::default(),
            default_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum sandboxes concurrently acquired per artifact
    pub per_artifact_cap: usize,
    /// Idle time after which a warm sandbox is evicted
    pub idle_ttl_ms: u64,
    /// Interval of the background eviction sweep
    pub sweep_interval_ms: u64,
    /// Upper bound on a single cold start
    pub creation_timeout_ms: u64,
    /// How long `acquire` waits for a slot before failing with PoolExhausted
    pub admission_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            per_artifact_cap: 4,
            idle_ttl_ms: 60_000,
            sweep_interval_ms: 5_000,
            creation_timeout_ms: 30_000,
            admission_wait_ms: 10_000,
        }
    }
}

/// Which container engine CLI to drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Docker CLI
    Docker,
    /// Podman CLI (docker-compatible surface)
    Podman,
    /// Probe docker first, then podman
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container engine selection
    pub engine: EngineKind,
    /// Enable networking inside sandboxes (default: off)
    pub enable_networking: bool,
    /// Memory limit per sandbox in MB
    pub memory_limit_mb: u64,
    /// Resolve unregistered functions via the `<name>_<language>` convention
    pub convention_images: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            enable_networking: false,
            memory_limit_mb: 256,
            convention_images: true,
        }
    }
}
