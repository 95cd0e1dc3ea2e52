//! Simulated host environment
//!
//! One `Environment` lives for the whole process. It owns the persistent
//! store, the captured-output buffer, the HTTP client and the mock proxy
//! configuration. Per-run fields (script context, `$request`, `$response`,
//! `$argument`, completion listener) are reset by [`Environment::begin_run`].
//!
//! Only one script runs at a time; the per-run fields are not meant to be
//! shared by concurrent runs.

pub mod http;
pub mod logs;
pub mod notify;
pub mod policy;
pub mod store;
pub mod utils;

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::common::config::{Config, DeviceConfig};
use crate::common::{Error, Result};

pub use http::{
    HttpClient, HttpMethod, HttpOutcome, HttpRequest, HttpResponse, ReqwestTransport,
    ResponseBody, Transport, TransportResponse,
};
pub use logs::LogBuffer;
pub use notify::Notification;
pub use policy::PolicyState;
pub use store::PersistedStore;

/// Receives the `$done()` payload of the current run
pub type CompletionListener = Box<dyn FnOnce(Option<Value>) + Send>;

/// Per-run script identity exposed as `$script`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptContext {
    pub name: String,
    /// RFC 3339 timestamp of the run start
    pub start_time: String,
}

impl ScriptContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

struct RunState {
    context: ScriptContext,
    request: Value,
    response: Value,
    argument: String,
    listener: Option<CompletionListener>,
}

/// The capability surface scripts see as globals
pub struct Environment {
    store: PersistedStore,
    logs: LogBuffer,
    http: HttpClient,
    device: DeviceConfig,
    user_agent: String,
    runtime: Handle,
    run: Mutex<RunState>,
    policy: Mutex<PolicyState>,
}

impl Environment {
    /// Build the environment from configuration with the real network transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::new(config, transport)
    }

    /// Build the environment with an explicit HTTP transport
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("Environment needs a tokio runtime: {}", e)))?;
        let store = PersistedStore::open(&config.store.path);
        let http = HttpClient::new(
            transport,
            config.http.user_agent.clone(),
            std::time::Duration::from_millis(config.http.default_timeout_ms),
        );
        let user_agent = config.http.user_agent.clone();

        Ok(Self {
            store,
            logs: LogBuffer::new(config.runner.echo_logs),
            http,
            device: config.device.clone(),
            run: Mutex::new(RunState {
                context: ScriptContext::new("test-script"),
                request: default_request(&user_agent),
                response: default_response(),
                argument: String::new(),
                listener: None,
            }),
            user_agent,
            runtime,
            policy: Mutex::new(PolicyState::default()),
        })
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn store(&self) -> &PersistedStore {
        &self.store
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    // === Run lifecycle ===

    /// Reset per-run state for a new script and return its context
    pub fn begin_run(&self, name: &str) -> ScriptContext {
        let context = ScriptContext::new(name);
        let mut run = self.lock_run();
        run.context = context.clone();
        run.request = default_request(&self.user_agent);
        run.response = default_response();
        run.argument.clear();
        run.listener = None;
        context
    }

    /// Shallow-merge fields over the default `$request`
    pub fn set_request(&self, overrides: &Value) {
        merge_object(&mut self.lock_run().request, overrides);
    }

    /// Shallow-merge fields over the default `$response`
    pub fn set_response(&self, overrides: &Value) {
        merge_object(&mut self.lock_run().response, overrides);
    }

    pub fn set_argument(&self, argument: impl Into<String>) {
        self.lock_run().argument = argument.into();
    }

    pub fn context(&self) -> ScriptContext {
        self.lock_run().context.clone()
    }

    pub fn request(&self) -> Value {
        self.lock_run().request.clone()
    }

    pub fn response(&self) -> Value {
        self.lock_run().response.clone()
    }

    pub fn argument(&self) -> String {
        self.lock_run().argument.clone()
    }

    /// `$environment` for generic scripts
    pub fn environment_params(&self) -> Value {
        json!({
            "params": {
                "node": "HK Node",
                "nodeInfo": { "name": "HK Node", "type": "shadowsocks" }
            }
        })
    }

    // === Completion ===

    /// Register the listener notified by the next `$done()`
    pub fn set_completion_listener(&self, listener: CompletionListener) {
        self.lock_run().listener = Some(listener);
    }

    /// `$done(payload)`: only the first call of a run reaches the listener
    pub fn complete(&self, payload: Option<Value>) {
        self.logs.push("[done] script finished");
        if let Some(payload) = &payload {
            let pretty =
                serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
            self.logs.push(format!("[done] payload: {}", pretty));
        }

        let listener = self.lock_run().listener.take();
        match listener {
            Some(listener) => listener(payload),
            None => tracing::debug!("$done() called with no listener registered, ignoring"),
        }
    }

    // === Storage ===

    /// `$persistentStore.write`: key defaults to the script name
    pub fn store_write(&self, value: &str, key: Option<&str>) -> bool {
        let key = self.storage_key(key);
        match self.store.write(&key, value) {
            Ok(()) => {
                self.logs.push(format!("[store] write: {} = {}", key, value));
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.logs.push(format!("[store] write failed: {}", e));
                false
            }
        }
    }

    /// `$persistentStore.read`: `None` is "not found"
    pub fn store_read(&self, key: Option<&str>) -> Option<String> {
        let key = self.storage_key(key);
        let value = self.store.read(&key);
        self.logs.push(format!(
            "[store] read: {} = {}",
            key,
            value.as_deref().unwrap_or("undefined")
        ));
        value
    }

    /// `$persistentStore.remove`: empty the whole store
    pub fn store_clear(&self) -> bool {
        match self.store.clear() {
            Ok(()) => {
                self.logs.push("[store] cleared all data");
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.logs.push(format!("[store] clear failed: {}", e));
                false
            }
        }
    }

    fn storage_key(&self, key: Option<&str>) -> String {
        match key {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => self.lock_run().context.name.clone(),
        }
    }

    // === Notifications ===

    /// Display a notification after its delay without blocking the caller
    ///
    /// Even a zero delay is deferred to the runtime. Output from a
    /// notification that fires after its run ended is not captured.
    pub fn post_notification(&self, notification: Notification) {
        let logs = self.logs.clone();
        let generation = logs.generation();
        self.runtime.spawn(async move {
            if notification.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(notification.delay).await;
            }
            for line in notification.render() {
                logs.push_for(generation, line);
            }
        });
    }

    // === HTTP ===

    /// Issue a request in the background; `callback` runs exactly once
    pub fn http_request<F>(&self, request: HttpRequest, callback: F)
    where
        F: FnOnce(HttpOutcome) + Send + 'static,
    {
        self.logs
            .push(format!("[http] {} {}", request.method, request.url));
        let http = self.http.clone();
        let logs = self.logs.clone();
        let generation = logs.generation();
        self.runtime.spawn(async move {
            let outcome = http.execute(request).await;
            match &outcome {
                Ok((response, _)) => {
                    logs.push_for(generation, format!("[http] response: {}", response.status))
                }
                Err(e) => logs.push_for(generation, format!("[http] request failed: {}", e)),
            }
            callback(outcome);
        });
    }

    // === $config ===

    pub fn policy(&self) -> MutexGuard<'_, PolicyState> {
        self.policy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // === $utils ===

    pub fn geoip(&self, ip: &str) -> String {
        self.logs.push(format!("[utils] geoip lookup for {}", ip));
        utils::geoip(ip).to_string()
    }

    pub fn ipasn(&self, ip: &str) -> String {
        self.logs.push(format!("[utils] ASN lookup for {}", ip));
        utils::ipasn(ip).to_string()
    }

    pub fn ipaso(&self, ip: &str) -> String {
        self.logs.push(format!("[utils] ASO lookup for {}", ip));
        utils::ipaso(ip).to_string()
    }

    pub fn ungzip(&self, data: &[u8]) -> Vec<u8> {
        self.logs.push("[utils] ungzip");
        utils::ungzip(data)
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn default_request(user_agent: &str) -> Value {
    json!({
        "url": "https://example.com/test",
        "method": "GET",
        "headers": {
            "User-Agent": user_agent,
            "Content-Type": "application/json"
        },
        "body": ""
    })
}

fn default_response() -> Value {
    json!({
        "status": 200,
        "headers": { "Content-Type": "application/json" },
        "body": r#"{"message": "test response"}"#
    })
}

/// Copy top-level fields of `overlay` onto `base`; non-objects are ignored
fn merge_object(base: &mut Value, overlay: &Value) {
    let (Some(base), Some(overlay)) = (base.as_object_mut(), overlay.as_object()) else {
        return;
    };
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::http::tests::MockTransport;
    use std::time::Duration;
    use tempfile::tempdir;

    fn environment(dir: &std::path::Path) -> Environment {
        let mut config = Config::default();
        config.store.path = dir.join("store.json");
        config.runner.echo_logs = false;
        Environment::new(&config, Arc::new(MockTransport::default())).unwrap()
    }

    #[tokio::test]
    async fn test_store_key_defaults_to_script_name() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.begin_run("checkin");

        assert!(env.store_write("42", None));
        assert_eq!(env.store_read(Some("checkin")).as_deref(), Some("42"));
        assert_eq!(env.store_read(None).as_deref(), Some("42"));
        assert_eq!(env.store_read(Some("never-written")), None);
    }

    #[tokio::test]
    async fn test_store_clear_removes_everything() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.store_write("1", Some("a"));
        env.store_write("2", Some("b"));

        assert!(env.store_clear());
        assert_eq!(env.store_read(Some("a")), None);
        assert_eq!(env.store_read(Some("b")), None);
    }

    #[tokio::test]
    async fn test_begin_run_resets_overrides() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.begin_run("first");
        env.set_request(&json!({"url": "https://override.test/", "extra": true}));
        env.set_argument("Beijing");
        assert_eq!(env.request()["url"], "https://override.test/");
        assert_eq!(env.request()["method"], "GET");
        assert_eq!(env.argument(), "Beijing");

        env.begin_run("second");
        assert_eq!(env.request()["url"], "https://example.com/test");
        assert!(env.request().get("extra").is_none());
        assert_eq!(env.argument(), "");
        assert_eq!(env.context().name, "second");
    }

    #[tokio::test]
    async fn test_response_override_merges() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.set_response(&json!({"status": 404}));
        assert_eq!(env.response()["status"], 404);
        assert_eq!(env.response()["headers"]["Content-Type"], "application/json");
    }

    #[tokio::test]
    async fn test_only_first_completion_reaches_listener() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        let (tx, rx) = std::sync::mpsc::channel();
        env.set_completion_listener(Box::new(move |payload| {
            let _ = tx.send(payload);
        }));

        env.complete(Some(json!({"body": "first"})));
        env.complete(Some(json!({"body": "second"})));

        assert_eq!(rx.try_recv().unwrap(), Some(json!({"body": "first"})));
        assert!(rx.try_recv().is_err());
        assert!(env
            .logs()
            .snapshot()
            .iter()
            .any(|l| l.contains("\"first\"")));
    }

    #[tokio::test]
    async fn test_notification_is_deferred() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.logs().clear();

        env.post_notification(Notification::new("Hello", "Sub", "Body"));
        // Nothing yet: display happens on a later scheduling tick.
        assert!(env.logs().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(env.logs().snapshot().iter().any(|l| l == "Title: Hello"));
    }

    #[tokio::test]
    async fn test_late_notification_not_captured_by_next_run() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        env.logs().clear();
        env.post_notification(Notification::new("Late", "", "").with_delay_secs(0.05));
        env.logs().clear();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(env.logs().is_empty());
    }

    #[tokio::test]
    async fn test_http_request_callback_with_error() {
        let dir = tempdir().unwrap();
        let env = environment(dir.path());
        let (tx, rx) = tokio::sync::oneshot::channel();

        env.http_request(
            HttpRequest::new(HttpMethod::Get, "https://unrouted.test/"),
            move |outcome| {
                let _ = tx.send(outcome.is_err());
            },
        );

        assert!(rx.await.unwrap());
        let logs = env.logs().snapshot();
        assert_eq!(logs[0], "[http] GET https://unrouted.test/");
        assert!(logs[1].starts_with("[http] request failed"));
    }

    #[test]
    fn test_merge_ignores_non_objects() {
        let mut base = json!({"a": 1});
        merge_object(&mut base, &json!("text"));
        assert_eq!(base, json!({"a": 1}));
    }
}
