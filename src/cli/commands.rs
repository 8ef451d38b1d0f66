use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::cli::args::{
    ConfigAction, ConfigArgs, FunctionsArgs, InitArgs, InvokeArgs, OutputFormat,
};
use crate::config::loader::get_config_path;
use crate::config::types::FuncletConfig;
use crate::dispatch::{Dispatcher, InvocationRequest, InvocationResult};
use crate::error::Result;
use crate::registry::StaticRegistry;
use crate::sandbox::{available_engines, create_runtime, SandboxPool};

/// Invoke a function and print its structured result.
///
/// Exits the process with code 0 iff the invocation succeeded.
pub async fn invoke(args: InvokeArgs, mut config: FuncletConfig, format: OutputFormat) -> Result<()> {
    info!(function = %args.function, language = %args.language, "Invoking function");

    if let Some(engine) = args.engine {
        config.runtime.engine = engine;
    }

    let registry = Arc::new(build_registry(&config));
    let runtime = create_runtime(&config.runtime)?;
    let pool = SandboxPool::start(Arc::clone(&runtime), config.pool.clone());
    let dispatcher = Dispatcher::new(registry, runtime, Arc::clone(&pool), config.dispatcher);

    let request = InvocationRequest {
        function_name: args.function.clone(),
        language: args.language.clone(),
        timeout_ms: args.timeout_ms,
        input_payload: args.payload,
    };

    let result = dispatcher.invoke(request).await;

    // One-shot CLI process: nothing to keep warm past this point
    pool.shutdown().await;

    output_invocation_result(&args.function, &args.language, &result, format);

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// List the functions registered in the configuration.
pub async fn functions(args: FunctionsArgs, config: FuncletConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if config.functions.is_empty() {
                println!("No functions registered");
                if config.runtime.convention_images {
                    println!("(unregistered functions resolve via the <name>_<language> image convention)");
                }
                return Ok(());
            }

            if args.images {
                println!("{:<24} {:<12} IMAGE", "FUNCTION", "LANGUAGE");
                println!("{}", "-".repeat(60));
                for entry in &config.functions {
                    println!("{:<24} {:<12} {}", entry.name, entry.language, entry.image_id());
                }
            } else {
                println!("{:<24} LANGUAGE", "FUNCTION");
                println!("{}", "-".repeat(36));
                for entry in &config.functions {
                    println!("{:<24} {}", entry.name, entry.language);
                }
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = config
                .functions
                .iter()
                .map(|entry| {
                    serde_json::json!({
                        "name": entry.name,
                        "language": entry.language,
                        "image": entry.image_id(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

/// Show available container engines.
pub async fn engines(format: OutputFormat) -> Result<()> {
    let engines = available_engines();

    match format {
        OutputFormat::Text => {
            println!("{:<12} {:<12} DESCRIPTION", "ENGINE", "AVAILABLE");
            println!("{}", "-".repeat(60));
            for engine in engines {
                let availability = if engine.available {
                    "yes".to_string()
                } else {
                    format!("no ({})", engine.unavailable_reason.unwrap_or("unknown"))
                };
                println!("{:<12} {:<12} {}", engine.name, availability, engine.description);
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = engines
                .iter()
                .map(|engine| {
                    serde_json::json!({
                        "name": engine.name,
                        "available": engine.available,
                        "description": engine.description,
                        "unavailable_reason": engine.unavailable_reason,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = FuncletConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| crate::error::FuncletError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Invoke a packaged function (image <name>_<language>)");
    println!("  funclet invoke example_function python");
    println!();
    println!("  # With an explicit timeout and payload");
    println!("  funclet invoke example_function python 5000 --payload '{{\"n\": 3}}'");
    println!();
    println!("  # List registered functions");
    println!("  funclet functions");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: FuncletConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| crate::error::FuncletError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn build_registry(config: &FuncletConfig) -> StaticRegistry {
    StaticRegistry::from_entries(
        config
            .functions
            .iter()
            .map(|entry| (entry.name.clone(), entry.language, entry.image_id())),
        config.runtime.convention_images,
    )
}

fn output_invocation_result(
    function: &str,
    language: &str,
    result: &InvocationResult,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Text => {
            println!("status      {}", result.status);
            println!("function    {}", function);
            println!("language    {}", language);
            if let Some(stdout) = &result.stdout {
                println!("stdout      {}", stdout);
            }
            if let Some(stderr) = &result.stderr {
                println!("stderr      {}", stderr);
            }
            if let Some(exit_code) = result.exit_code {
                println!("exit_code   {}", exit_code);
            }
            if let Some(message) = &result.message {
                println!("message     {}", message);
            }
            println!("elapsed_ms  {}", result.elapsed_ms);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "function": function,
                    "language": language,
                    "invoked_at": Utc::now().to_rfc3339(),
                    "status": result.status,
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exit_code": result.exit_code,
                    "elapsed_ms": result.elapsed_ms,
                    "message": result.message,
                })
            );
        }
    }
}
