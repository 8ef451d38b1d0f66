use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuncletError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Request validation errors
    #[error("Unsupported language '{language}'. Choose 'python' or 'javascript'")]
    UnsupportedLanguage { language: String },

    #[error("Function '{name}' is not registered for language '{language}'")]
    FunctionNotFound { name: String, language: String },

    // Engine errors
    #[error("Container engine '{engine}' is not available: {reason}")]
    EngineNotAvailable { engine: String, reason: String },

    // Pool errors
    #[error("Sandbox pool exhausted for image '{image}' (waited {waited_ms}ms)")]
    PoolExhausted { image: String, waited_ms: u64 },

    #[error("Sandbox creation timed out after {timeout_ms}ms for image '{image}'")]
    SandboxCreationTimeout { image: String, timeout_ms: u64 },

    #[error("Sandbox creation failed: {0}")]
    SandboxCreationFailed(String),

    // Execution errors
    #[error("Sandbox execution failed: {0}")]
    SandboxExec(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FuncletError {
    /// Transient capacity conditions the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::SandboxCreationTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FuncletError>;
