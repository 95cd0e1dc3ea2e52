//! Captured script output
//!
//! Every line a script produces (console output, capability traces,
//! notification blocks) lands here. The runner clears the buffer before a
//! run and snapshots it afterwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide buffer of captured script output
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    lines: Mutex<Vec<String>>,
    /// Bumped on every clear, so deferred writers can tell their run is over
    generation: AtomicU64,
    echo: AtomicBool,
}

impl LogBuffer {
    pub fn new(echo: bool) -> Self {
        let buffer = Self::default();
        buffer.set_echo(echo);
        buffer
    }

    /// Echo captured lines to stdout as they arrive
    pub fn set_echo(&self, echo: bool) {
        self.inner.echo.store(echo, Ordering::Relaxed);
    }

    /// Current run generation
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Append a line to the current run
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        self.echo(&line);
        self.lock().push(line);
    }

    /// Append a line only if the buffer has not been cleared since `generation`
    ///
    /// Stale lines are still echoed so they are not lost to the user.
    pub fn push_for(&self, generation: u64, line: impl Into<String>) {
        let line = line.into();
        self.echo(&line);
        let mut lines = self.lock();
        if self.generation() == generation {
            lines.push(line);
        } else {
            tracing::debug!("dropping output from a finished run: {}", line);
        }
    }

    /// Drop all captured lines and start a new generation
    pub fn clear(&self) -> u64 {
        let mut lines = self.lock();
        lines.clear();
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Copy of the captured lines
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn echo(&self, line: &str) {
        if self.inner.echo.load(Ordering::Relaxed) {
            println!("{}", line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // A panic while holding the lock leaves plain strings behind; keep going.
        self.inner
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_clear() {
        let logs = LogBuffer::new(false);
        logs.push("one");
        logs.push(String::from("two"));
        assert_eq!(logs.snapshot(), vec!["one", "two"]);

        logs.clear();
        assert!(logs.is_empty());
    }

    #[test]
    fn test_stale_generation_is_dropped() {
        let logs = LogBuffer::new(false);
        let first = logs.clear();
        logs.push_for(first, "kept");

        let second = logs.clear();
        assert_ne!(first, second);
        logs.push_for(first, "late notification");
        logs.push_for(second, "current");

        assert_eq!(logs.snapshot(), vec!["current"]);
    }

    #[test]
    fn test_clones_share_lines() {
        let logs = LogBuffer::new(false);
        let other = logs.clone();
        other.push("shared");
        assert_eq!(logs.len(), 1);
    }
}
