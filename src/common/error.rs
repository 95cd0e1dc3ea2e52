//! Error types for the script simulator
//!
//! Errors raised inside a script's own capability calls (storage, HTTP) are
//! never thrown into the script; they surface as return values or callback
//! arguments. The variants here cover what the runner and CLI see.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the simulator
#[derive(Error, Debug)]
pub enum Error {
    // === Script Errors ===
    #[error("Failed to load script '{path}': {error}")]
    ScriptLoad { path: String, error: String },

    #[error("{message}")]
    ScriptException {
        message: String,
        stack: Option<String>,
    },

    #[error("Script timed out after {0}ms without calling $done()")]
    ScriptTimeout(u64),

    #[error("Script engine initialization failed: {0}")]
    EngineInit(String),

    // === HTTP Errors ===
    #[error("{0}")]
    Http(String),

    #[error("Request timed out after {0}ms")]
    HttpTimeout(u64),

    #[error("Invalid request parameters: {0}")]
    InvalidRequest(String),

    // === Storage Errors ===
    #[error("Persistent store error at '{path}': {error}")]
    Store { path: String, error: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a script load error for a path
    pub fn script_load(path: &str, error: impl ToString) -> Self {
        Self::ScriptLoad {
            path: path.to_string(),
            error: error.to_string(),
        }
    }

    /// Create a script exception error
    pub fn script_exception(message: impl Into<String>, stack: Option<String>) -> Self {
        Self::ScriptException {
            message: message.into(),
            stack,
        }
    }

    /// Create a store I/O error
    pub fn store(path: &std::path::Path, error: impl ToString) -> Self {
        Self::Store {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Stack trace attached to this error, if any
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::ScriptException { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display_is_message() {
        let err = Error::script_exception("boom", Some("at <eval>:1".to_string()));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.stack(), Some("at <eval>:1"));
    }
}
