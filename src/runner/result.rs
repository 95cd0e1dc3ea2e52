//! Run outcomes and the session summary

use std::fmt::Write as _;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

/// Classification of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// `$done()` was called in time
    Success,
    /// Load, parse or top-level execution error
    Failure,
    /// `$done()` never arrived; counted as a failure
    Timeout,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Timeout => "timeout",
        }
    }
}

/// Outcome of one script execution
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Script path as given to the runner
    pub script: String,
    /// Name derived from the path, as seen by the script in `$script.name`
    pub name: String,
    pub status: RunStatus,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Value passed to `$done()`
    pub payload: Option<Value>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub stack: Option<String>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Counts over a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
}

/// Results accumulated over one process lifetime
#[derive(Debug, Default)]
pub struct RunnerSession {
    results: Vec<RunResult>,
}

impl RunnerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: RunResult) {
        self.results.push(result);
    }

    pub fn summary(&self) -> SessionSummary {
        let success = self.results.iter().filter(|r| r.is_success()).count();
        SessionSummary {
            total: self.results.len(),
            success,
            failure: self.results.len() - success,
        }
    }

    /// Plain-text report: counts, then one line per run
    pub fn render_summary(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Total: {} | Success: {} | Failure: {}",
            summary.total, summary.success, summary.failure
        );
        for (index, result) in self.results.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} - {} ({}ms)",
                index + 1,
                result.script,
                result.status.label(),
                result.duration.as_millis()
            );
            if let Some(error) = &result.error {
                let _ = writeln!(out, "    error: {}", error);
            }
        }
        out
    }

    /// Print the report to stdout
    pub fn print_summary(&self) {
        let rule = "=".repeat(60);
        println!("\n{}", rule);
        println!("{}", "Test Summary".blue().bold());
        println!("{}\n", rule);

        for line in self.render_summary().lines() {
            if line.contains(" - success (") {
                println!("{} {}", "✓".green(), line);
            } else if line.contains(" - failure (") || line.contains(" - timeout (") {
                println!("{} {}", "✗".red(), line);
            } else {
                println!("  {}", line);
            }
        }
        println!("{}\n", rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(script: &str, status: RunStatus, error: Option<&str>) -> RunResult {
        RunResult {
            script: script.to_string(),
            name: script.trim_end_matches(".js").to_string(),
            status,
            duration: Duration::from_millis(12),
            payload: None,
            logs: Vec::new(),
            error: error.map(str::to_string),
            stack: None,
        }
    }

    #[test]
    fn test_summary_counts_timeout_as_failure() {
        let mut session = RunnerSession::new();
        session.push(result("a.js", RunStatus::Success, None));
        session.push(result("b.js", RunStatus::Timeout, Some("timed out")));
        session.push(result("c.js", RunStatus::Failure, Some("boom")));

        assert_eq!(
            session.summary(),
            SessionSummary {
                total: 3,
                success: 1,
                failure: 2
            }
        );
    }

    #[test]
    fn test_render_lists_each_run() {
        let mut session = RunnerSession::new();
        session.push(result("a.js", RunStatus::Success, None));
        session.push(result("b.js", RunStatus::Failure, Some("boom")));

        let report = session.render_summary();
        assert!(report.starts_with("Total: 2 | Success: 1 | Failure: 1"));
        assert!(report.contains("[1] a.js - success (12ms)"));
        assert!(report.contains("[2] b.js - failure (12ms)"));
        assert!(report.contains("    error: boom"));
    }

    #[test]
    fn test_empty_session() {
        let session = RunnerSession::new();
        assert_eq!(session.summary(), SessionSummary::default());
        assert_eq!(session.render_summary(), "Total: 0 | Success: 0 | Failure: 0\n");
    }

    #[test]
    fn test_result_serializes_duration_in_ms() {
        let value = serde_json::to_value(result("a.js", RunStatus::Timeout, None)).unwrap();
        assert_eq!(value["duration"], 12);
        assert_eq!(value["status"], "timeout");
    }
}
