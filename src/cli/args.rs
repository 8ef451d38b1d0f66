use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::EngineKind;

#[derive(Parser, Debug)]
#[clap(name = "funclet")]
#[clap(version, about = "Single-node function invocation service")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "FUNCLET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Invoke a packaged function and print its structured result
    Invoke(InvokeArgs),

    /// List the functions registered in the configuration
    Functions(FunctionsArgs),

    /// Show available container engines
    Engines,

    /// Initialize a new funclet configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Function name
    pub function: String,

    /// Function language (python or javascript)
    pub language: String,

    /// Wall-clock timeout in milliseconds (default from config)
    pub timeout_ms: Option<u64>,

    /// Payload delivered to the function on stdin
    #[clap(long, short = 'p')]
    pub payload: Option<String>,

    /// Container engine override
    #[clap(long, value_enum)]
    pub engine: Option<EngineKind>,
}

#[derive(Args, Debug)]
pub struct FunctionsArgs {
    /// Include the image each function resolves to
    #[clap(long)]
    pub images: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
