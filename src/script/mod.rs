//! Sandboxed QuickJS host for Loon scripts
//!
//! Each run gets a fresh runtime and context with only the environment's
//! capability surface installed: no filesystem, process or module access.
//! The script body runs as one top-level function so its declarations stay
//! local to the run.

mod bindings;
mod event_loop;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rquickjs::{CatchResultExt, Context, Runtime, Value};
use tokio::task::JoinHandle;

use crate::common::config::EngineConfig;
use crate::common::{Error, Result};
use crate::env::Environment;

use event_loop::LoopState;

/// Thread-safe cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Executes script source against an [`Environment`]
#[derive(Debug, Clone)]
pub struct ScriptHost {
    memory_limit: usize,
}

impl ScriptHost {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            memory_limit: config.memory_limit_bytes(),
        }
    }

    /// Run a script on the blocking pool
    pub fn spawn(
        &self,
        env: Arc<Environment>,
        source: String,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let host = self.clone();
        tokio::task::spawn_blocking(move || host.run_blocking(env, &source, deadline, &cancel))
    }

    /// Evaluate the script, then drive its timers and callbacks
    ///
    /// Returns an error only when the top-level pass throws or fails to
    /// parse. Returning `Ok` says nothing about completion: the caller learns
    /// that through the environment's completion listener.
    pub fn run_blocking(
        &self,
        env: Arc<Environment>,
        source: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let runtime = Runtime::new().map_err(|e| Error::EngineInit(e.to_string()))?;
        runtime.set_memory_limit(self.memory_limit);

        // Cuts off tight loops once the run is over
        let interrupt = cancel.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            interrupt.is_cancelled() || Instant::now() >= deadline
        })));

        let context = Context::full(&runtime).map_err(|e| Error::EngineInit(e.to_string()))?;

        let (sender, events) = std::sync::mpsc::channel();
        let state = Rc::new(RefCell::new(LoopState::new(sender)));

        context.with(|ctx| -> Result<()> {
            bindings::install(&ctx, env.clone(), state.clone())
                .catch(&ctx)
                .map_err(|caught| Error::EngineInit(bindings::describe_caught(caught).0))?;

            match ctx.eval::<Value, _>(wrap_source(source)).catch(&ctx) {
                Ok(_) => Ok(()),
                // An interrupted pass is a timeout or cancellation, not a script error
                Err(_) if cancel.is_cancelled() || Instant::now() >= deadline => Ok(()),
                Err(caught) => Err(bindings::caught_to_error(caught)),
            }
        })?;

        event_loop::run(&runtime, &context, &state, &events, &env, deadline, cancel);
        Ok(())
    }
}

/// Scope the script body in a function, as the host app does
fn wrap_source(source: &str) -> String {
    format!("(function () {{\n{}\n}})();", source)
}
