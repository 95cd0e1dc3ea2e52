//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_store_path};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Persistent store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP capability settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Script engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Device info exposed to scripts as `$loon`
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Runner settings
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// How long to wait for `$done()` before failing a run
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between scripts when running the demo set
    #[serde(default = "default_inter_run_delay_ms")]
    pub inter_run_delay_ms: u64,

    /// Scripts run when no path is given on the command line
    #[serde(default = "default_demos")]
    pub demos: Vec<PathBuf>,

    /// Echo script output to stdout as it is captured
    #[serde(default = "default_true")]
    pub echo_logs: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            inter_run_delay_ms: default_inter_run_delay_ms(),
            demos: default_demos(),
            echo_logs: true,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn inter_run_delay(&self) -> Duration {
        Duration::from_millis(self.inter_run_delay_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_inter_run_delay_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

fn default_demos() -> Vec<PathBuf> {
    [
        "demos/cron.js",
        "demos/http.js",
        "demos/storage.js",
        "demos/request.js",
        "demos/response.js",
        "demos/checkin.js",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Persistent store settings
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// JSON file backing `$persistentStore`
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// HTTP capability settings
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Per-request timeout when the script does not give one
    #[serde(default = "default_http_timeout_ms")]
    pub default_timeout_ms: u64,

    /// User-Agent sent unless the script sets its own
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_http_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout_ms() -> u64 {
    5_000
}
fn default_user_agent() -> String {
    "Loon/3.0.0".to_string()
}

/// Script engine limits
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// QuickJS heap limit
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

impl EngineConfig {
    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb * 1024 * 1024
    }
}

fn default_memory_limit_mb() -> usize {
    64
}

/// Device info exposed as `$loon`
#[derive(Debug, Deserialize, Clone, serde::Serialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct DeviceConfig {
    #[serde(default = "default_device_name", rename(serialize = "deviceName"))]
    pub name: String,
    #[serde(default = "default_system_version")]
    pub system_version: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_build_version")]
    pub build_version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            system_version: default_system_version(),
            app_version: default_app_version(),
            build_version: default_build_version(),
        }
    }
}

fn default_device_name() -> String {
    "Windows Simulator".to_string()
}
fn default_system_version() -> String {
    "1.0.0".to_string()
}
fn default_app_version() -> String {
    "3.0.0".to_string()
}
fn default_build_version() -> String {
    "1000".to_string()
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used if present, otherwise defaults are returned.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.runner.timeout_ms, 30_000);
        assert_eq!(config.runner.inter_run_delay_ms, 1_000);
        assert_eq!(config.runner.demos.len(), 6);
        assert_eq!(config.http.default_timeout_ms, 5_000);
        assert_eq!(config.engine.memory_limit_bytes(), 64 * 1024 * 1024);
        assert_eq!(config.store.path, PathBuf::from("persistent-store.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [runner]
            timeout_ms = 500

            [device]
            name = "Test Phone"
            "#,
        )
        .unwrap();
        assert_eq!(config.runner.timeout_ms, 500);
        assert_eq!(config.runner.inter_run_delay_ms, 1_000);
        assert_eq!(config.device.name, "Test Phone");
        assert_eq!(config.device.app_version, "3.0.0");
    }

    #[test]
    fn test_device_serializes_as_loon_object() {
        let value = serde_json::to_value(DeviceConfig::default()).unwrap();
        assert_eq!(value["deviceName"], "Windows Simulator");
        assert_eq!(value["buildVersion"], "1000");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::from_toml("runner = 3").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
