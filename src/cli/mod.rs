//! CLI command handling
//!
//! Builds the environment from configuration and flags, runs either one
//! script or the demo set, and prints the session summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::commands::RunArgs;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::env::Environment;
use crate::runner::{RunOptions, ScriptRunner};

/// Run the CLI. Returns `false` when a single script run did not succeed.
pub async fn dispatch(args: RunArgs) -> Result<bool> {
    let config = load_config(&args)?;
    let options = run_options(&args)?;

    let env = Arc::new(Environment::from_config(&config)?);
    tracing::debug!("persistent store at {}", env.store().path().display());
    let mut runner = ScriptRunner::new(env, &config).with_verbose(args.verbose);

    match &args.script {
        Some(script) => {
            let result = runner.run_script(script, options).await;
            runner.print_summary();
            Ok(result.is_success())
        }
        None => {
            let demos = &config.runner.demos;
            if demos.is_empty() {
                return Err(Error::Config("No demo scripts configured".to_string()));
            }
            println!("Running {} demo scripts", demos.len());

            for (index, demo) in demos.iter().enumerate() {
                if index > 0 {
                    tokio::time::sleep(config.runner.inter_run_delay()).await;
                }
                runner.run_script(&resolve_demo(demo), options.clone()).await;
            }

            // Demo failures are reported in the summary, not the exit code.
            runner.print_summary();
            Ok(true)
        }
    }
}

/// Load the config file, then apply command-line overrides
fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(timeout) = args.timeout {
        config.runner.timeout_ms = timeout;
    }
    if let Some(store) = &args.store {
        config.store.path = store.clone();
    }
    Ok(config)
}

fn run_options(args: &RunArgs) -> Result<RunOptions> {
    Ok(RunOptions {
        request: args
            .request
            .as_deref()
            .map(|json| parse_override("--request", json))
            .transpose()?,
        response: args
            .response
            .as_deref()
            .map(|json| parse_override("--response", json))
            .transpose()?,
        argument: args.argument.clone(),
        timeout: args.timeout.map(Duration::from_millis),
    })
}

fn parse_override(flag: &str, json: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("{} is not valid JSON: {}", flag, e)))?;
    if !value.is_object() {
        return Err(Error::Config(format!("{} must be a JSON object", flag)));
    }
    Ok(value)
}

/// Demo paths are relative to the working directory, falling back to the
/// directory the crate was built from.
fn resolve_demo(path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join(path);
    if bundled.exists() {
        bundled
    } else {
        path.to_path_buf()
    }
}
