//! Script runner
//!
//! Loads one script, prepares the environment for it, executes it and races
//! its `$done()` against a timeout. Every run ends in a [`RunResult`] that is
//! also appended to the runner's session; no run can fail the session.

mod result;

pub use result::{RunResult, RunStatus, RunnerSession, SessionSummary};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::env::Environment;
use crate::script::{CancellationToken, ScriptHost};

/// How long a finished run's script thread gets to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Per-run overrides
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fields merged over the default `$request`
    pub request: Option<Value>,
    /// Fields merged over the default `$response`
    pub response: Option<Value>,
    /// `$argument`; empty when not given
    pub argument: Option<String>,
    /// Overrides the runner's default timeout
    pub timeout: Option<Duration>,
}

/// How the completion race ended
enum Outcome {
    Completed(Option<Value>),
    Failed(Error),
    TimedOut,
}

enum RaceEvent {
    Finished(std::result::Result<Option<Value>, oneshot::error::RecvError>),
    Joined(std::result::Result<Result<()>, JoinError>),
    Elapsed,
}

/// Runs scripts one at a time against a shared environment
pub struct ScriptRunner {
    env: Arc<Environment>,
    host: ScriptHost,
    session: RunnerSession,
    default_timeout: Duration,
    verbose: bool,
}

impl ScriptRunner {
    pub fn new(env: Arc<Environment>, config: &Config) -> Self {
        Self {
            env,
            host: ScriptHost::new(&config.engine),
            session: RunnerSession::new(),
            default_timeout: config.runner.timeout(),
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn session(&self) -> &RunnerSession {
        &self.session
    }

    pub fn print_summary(&self) {
        self.session.print_summary();
    }

    /// Run one script and record the result
    pub async fn run_script(&mut self, path: &Path, options: RunOptions) -> RunResult {
        let script = path.display().to_string();
        let rule = "=".repeat(60);
        println!("\n{}", rule);
        println!("{} {}", "Running script:".blue().bold(), script.white().bold());
        println!("{}\n", rule);

        self.env.logs().clear();
        let name = script_name(path);
        self.env.begin_run(&name);
        tracing::debug!("script name set: {}", name);

        if let Some(request) = &options.request {
            self.env.set_request(request);
            tracing::debug!("request override: {}", request);
        }
        if let Some(response) = &options.response {
            self.env.set_response(response);
            tracing::debug!("response override: {}", response);
        }
        if let Some(argument) = &options.argument {
            self.env.set_argument(argument.clone());
            tracing::debug!("argument: {}", argument);
        }

        let (done_tx, finished) = oneshot::channel();
        self.env.set_completion_listener(Box::new(move |payload| {
            let _ = done_tx.send(payload);
        }));

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        tracing::debug!("executing with timeout {}ms", timeout.as_millis());
        let started = Instant::now();

        let (outcome, duration) = match tokio::fs::read_to_string(path).await {
            Err(e) => (Outcome::Failed(Error::script_load(&script, e)), started.elapsed()),
            Ok(source) => {
                tracing::debug!("loaded {} characters of script source", source.chars().count());
                let cancel = CancellationToken::new();
                let execution =
                    self.host
                        .spawn(self.env.clone(), source, started + timeout, cancel.clone());

                let (outcome, unfinished) = race(finished, execution, timeout).await;
                let duration = started.elapsed();

                cancel.cancel();
                if let Some(handle) = unfinished {
                    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                        tracing::warn!("script thread for '{}' did not stop in time", name);
                    }
                }
                (outcome, duration)
            }
        };

        let logs = self.env.logs().snapshot();
        let result = match outcome {
            Outcome::Completed(payload) => RunResult {
                script,
                name,
                status: RunStatus::Success,
                duration,
                payload,
                logs,
                error: None,
                stack: None,
            },
            Outcome::TimedOut => RunResult {
                script,
                name,
                status: RunStatus::Timeout,
                duration,
                payload: None,
                logs,
                error: Some(Error::ScriptTimeout(timeout.as_millis() as u64).to_string()),
                stack: None,
            },
            Outcome::Failed(e) => RunResult {
                script,
                name,
                status: RunStatus::Failure,
                duration,
                payload: None,
                logs,
                error: Some(e.to_string()),
                stack: e.stack().map(str::to_string),
            },
        };

        self.report(&result);
        self.session.push(result.clone());
        result
    }

    fn report(&self, result: &RunResult) {
        let rule = "-".repeat(60);
        println!("\n{}", rule);
        if result.is_success() {
            println!(
                "{} Script finished ({}ms)",
                "✓".green().bold(),
                result.duration.as_millis()
            );
        } else {
            println!(
                "{} Script failed: {}",
                "✗".red().bold(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!("{}\n", rule);

        if !self.verbose {
            return;
        }
        if result.is_success() {
            println!("  Collected log lines: {}", result.logs.len());
            if let Some(payload) = &result.payload {
                let pretty =
                    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
                println!("  Returned payload: {}", pretty);
            }
        } else {
            if let Some(stack) = &result.stack {
                println!("  Stack:\n{}", stack.dimmed());
            }
            println!("  Logs before failure:");
            for line in &result.logs {
                println!("    {}", line.dimmed());
            }
        }
    }
}

/// Race `$done()` against the script failing and the timeout
///
/// Returns the script thread's handle if it is still running.
async fn race(
    mut finished: oneshot::Receiver<Option<Value>>,
    mut execution: JoinHandle<Result<()>>,
    timeout: Duration,
) -> (Outcome, Option<JoinHandle<Result<()>>>) {
    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);
    let mut listening = true;
    let mut running = true;

    loop {
        let event = tokio::select! {
            biased;
            payload = &mut finished, if listening => RaceEvent::Finished(payload),
            joined = &mut execution, if running => RaceEvent::Joined(joined),
            _ = &mut sleep => RaceEvent::Elapsed,
        };

        match event {
            RaceEvent::Finished(Ok(payload)) => {
                return (Outcome::Completed(payload), running.then_some(execution));
            }
            RaceEvent::Finished(Err(_)) => listening = false,
            RaceEvent::Joined(Ok(Ok(()))) => {
                // Event loop ended without $done(); the timeout decides.
                running = false;
            }
            RaceEvent::Joined(Ok(Err(e))) => {
                // A throw after $done() still counts as completion.
                if let Ok(payload) = finished.try_recv() {
                    return (Outcome::Completed(payload), None);
                }
                return (Outcome::Failed(e), None);
            }
            RaceEvent::Joined(Err(join_error)) => {
                return (
                    Outcome::Failed(Error::Internal(format!(
                        "script thread panicked: {}",
                        join_error
                    ))),
                    None,
                );
            }
            RaceEvent::Elapsed => return (Outcome::TimedOut, running.then_some(execution)),
        }
    }
}

/// Script name from a path: file name without directory or extension
pub fn script_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "script".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_script_name_strips_dir_and_extension() {
        assert_eq!(script_name(Path::new("demos/cron.js")), "cron");
        assert_eq!(script_name(Path::new("/abs/path/my.script.js")), "my.script");
        assert_eq!(script_name(&PathBuf::from("plain")), "plain");
        assert_eq!(script_name(Path::new("")), "script");
    }

    #[tokio::test]
    async fn test_race_completion_wins() {
        let (tx, rx) = oneshot::channel();
        let execution = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        tx.send(Some(serde_json::json!({"ok": true}))).unwrap();

        let (outcome, unfinished) = race(rx, execution, Duration::from_secs(5)).await;
        assert!(matches!(outcome, Outcome::Completed(Some(_))));
        assert!(unfinished.is_some());
    }

    #[tokio::test]
    async fn test_race_times_out_after_quiet_exit() {
        let (_tx, rx) = oneshot::channel::<Option<Value>>();
        let execution = tokio::spawn(async { Ok(()) });

        let started = Instant::now();
        let (outcome, unfinished) = race(rx, execution, Duration::from_millis(50)).await;
        assert!(matches!(outcome, Outcome::TimedOut));
        assert!(unfinished.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_race_reports_execution_error() {
        let (_tx, rx) = oneshot::channel::<Option<Value>>();
        let execution = tokio::spawn(async { Err(Error::script_exception("bad", None)) });

        let (outcome, _) = race(rx, execution, Duration::from_secs(5)).await;
        match outcome {
            Outcome::Failed(e) => assert_eq!(e.to_string(), "bad"),
            _ => panic!("expected failure"),
        }
    }
}
