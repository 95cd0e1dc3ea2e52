//! Configuration and data paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/loon-sim/`
//! - macOS: `~/Library/Application Support/loon-sim/`
//! - Windows: `%APPDATA%\loon-sim\`

use std::io;
use std::path::PathBuf;

/// Name used for the configuration directory
const APP_NAME: &str = "loon-sim";

/// File name of the persistent store when no path is configured
pub const DEFAULT_STORE_FILE: &str = "persistent-store.json";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default location of the persistent store (relative to the working directory)
pub fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILE)
}

/// Ensure the parent directory of a file exists
pub fn ensure_parent_dir(path: &std::path::Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            std::fs::create_dir_all(dir)
        }
        _ => Ok(()),
    }
}
