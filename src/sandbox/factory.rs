use std::sync::Arc;

use crate::config::types::{EngineKind, RuntimeConfig};
use crate::error::{FuncletError, Result};
use crate::sandbox::backends::ContainerCliRuntime;
use crate::sandbox::traits::SandboxRuntime;

/// Create the container runtime selected by the configuration.
///
/// Availability is probed here so an unusable engine is a configuration-time
/// error rather than a per-request failure.
pub fn create_runtime(config: &RuntimeConfig) -> Result<Arc<dyn SandboxRuntime>> {
    let binary = resolve_engine(&config.engine)?;
    Ok(Arc::new(ContainerCliRuntime::new(binary, config)))
}

/// Resolve the engine binary, handling Auto selection.
fn resolve_engine(requested: &EngineKind) -> Result<&'static str> {
    match requested {
        EngineKind::Auto => {
            if ContainerCliRuntime::is_available("docker") {
                return Ok("docker");
            }
            if ContainerCliRuntime::is_available("podman") {
                return Ok("podman");
            }
            Err(FuncletError::EngineNotAvailable {
                engine: "auto".to_string(),
                reason: "Neither docker nor podman is accessible. Ensure one is installed and running."
                    .to_string(),
            })
        }
        EngineKind::Docker => {
            if !ContainerCliRuntime::is_available("docker") {
                return Err(FuncletError::EngineNotAvailable {
                    engine: "docker".to_string(),
                    reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                        .to_string(),
                });
            }
            Ok("docker")
        }
        EngineKind::Podman => {
            if !ContainerCliRuntime::is_available("podman") {
                return Err(FuncletError::EngineNotAvailable {
                    engine: "podman".to_string(),
                    reason: "Podman is not accessible. Ensure Podman is installed.".to_string(),
                });
            }
            Ok("podman")
        }
    }
}

/// Get information about available engines on this system.
pub fn available_engines() -> Vec<EngineInfo> {
    vec![
        EngineInfo {
            name: "docker",
            available: ContainerCliRuntime::is_available("docker"),
            description: "Docker container engine",
            unavailable_reason: if ContainerCliRuntime::is_available("docker") {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        },
        EngineInfo {
            name: "podman",
            available: ContainerCliRuntime::is_available("podman"),
            description: "Podman container engine (docker-compatible CLI)",
            unavailable_reason: if ContainerCliRuntime::is_available("podman") {
                None
            } else {
                Some("Podman not installed")
            },
        },
    ]
}

/// Information about a container engine.
pub struct EngineInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
