//! CLI argument definitions

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Script to run; without one, the built-in demo scripts run in sequence
    pub script: Option<PathBuf>,

    /// Value exposed to the script as $argument
    #[arg(long)]
    pub argument: Option<String>,

    /// Milliseconds to wait for $done() before the run fails
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print payloads, stacks and debug diagnostics
    #[arg(long, short)]
    pub verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Persistent store file, overriding the configured one
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// JSON object merged over the default $request
    #[arg(long, value_name = "JSON")]
    pub request: Option<String>,

    /// JSON object merged over the default $response
    #[arg(long, value_name = "JSON")]
    pub response: Option<String>,
}
