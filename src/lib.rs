//! Loon script simulator
//!
//! A host for Loon proxy-app scripts outside the app: persistent storage,
//! notifications, an HTTP client and the `$done()` completion signal, backed
//! by an embedded QuickJS engine, plus a runner that classifies each run.

pub mod cli;
pub mod commands;
pub mod common;
pub mod env;
pub mod runner;
pub mod script;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use env::Environment;
pub use runner::{RunOptions, RunResult, RunStatus, ScriptRunner};
