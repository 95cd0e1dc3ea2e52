//! Event loop driving a script after its top-level pass
//!
//! Promise jobs, `setTimeout` timers and HTTP completions are processed on
//! the script's own thread until the run is cancelled or its deadline passes.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use rquickjs::{CatchResultExt, Context, Ctx, Function, Runtime};

use super::bindings::{describe_caught, describe_value};
use super::CancellationToken;
use crate::env::{Environment, HttpOutcome, ResponseBody};

/// Longest the loop sleeps before re-checking cancellation
const MAX_TICK: Duration = Duration::from_millis(20);

/// Largest timer delay; longer ones overflow and fire at once, as in browsers
const MAX_TIMER_DELAY_MS: f64 = i32::MAX as f64;

/// Timer delay for a `setTimeout` argument in milliseconds
pub(crate) fn timer_delay(delay_ms: f64) -> Duration {
    if delay_ms.is_finite() && delay_ms > 0.0 && delay_ms <= MAX_TIMER_DELAY_MS {
        Duration::from_secs_f64(delay_ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Completion of work started outside the script thread
pub(crate) enum HostEvent {
    Http { id: u32, outcome: HttpOutcome },
}

/// Pending timers and requests of one run
pub(crate) struct LoopState {
    next_id: u32,
    timers: BTreeSet<(Instant, u32)>,
    due_at: HashMap<u32, Instant>,
    in_flight: usize,
    sender: Sender<HostEvent>,
}

impl LoopState {
    pub(crate) fn new(sender: Sender<HostEvent>) -> Self {
        Self {
            next_id: 1,
            timers: BTreeSet::new(),
            due_at: HashMap::new(),
            in_flight: 0,
            sender,
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Schedule a timer; equal deadlines fire in scheduling order
    pub(crate) fn add_timer(&mut self, delay: Duration) -> u32 {
        let id = self.next_id();
        let now = Instant::now();
        let at = now.checked_add(delay).unwrap_or(now);
        self.timers.insert((at, id));
        self.due_at.insert(id, at);
        id
    }

    pub(crate) fn clear_timer(&mut self, id: u32) {
        if let Some(at) = self.due_at.remove(&id) {
            self.timers.remove(&(at, id));
        }
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.timers.first().map(|(at, _)| *at)
    }

    /// Remove and return timers due at `now`
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<u32> {
        let mut due = Vec::new();
        while let Some(&(at, id)) = self.timers.first() {
            if at > now {
                break;
            }
            self.timers.remove(&(at, id));
            self.due_at.remove(&id);
            due.push(id);
        }
        due
    }

    /// Reserve an id for a request and get the channel its outcome goes to
    pub(crate) fn start_request(&mut self) -> (u32, Sender<HostEvent>) {
        self.in_flight += 1;
        (self.next_id(), self.sender.clone())
    }

    fn finish_request(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Nothing left that could make the script call `$done()`
    pub(crate) fn is_idle(&self) -> bool {
        self.timers.is_empty() && self.in_flight == 0
    }
}

/// Drive the script until cancelled or past `deadline`
pub(crate) fn run(
    runtime: &Runtime,
    context: &Context,
    state: &Rc<RefCell<LoopState>>,
    events: &Receiver<HostEvent>,
    env: &Environment,
    deadline: Instant,
    cancel: &CancellationToken,
) {
    let mut reported_idle = false;

    loop {
        drain_jobs(runtime, context, env);

        if cancel.is_cancelled() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        if !reported_idle && !runtime.is_job_pending() && state.borrow().is_idle() {
            tracing::debug!("script has no pending work and has not called $done()");
            reported_idle = true;
        }

        let next_due = state.borrow().next_due();
        let wake = next_due
            .map_or(deadline, |at| at.min(deadline))
            .min(now + MAX_TICK);

        match events.recv_timeout(wake.saturating_duration_since(now)) {
            Ok(event) => {
                handle_event(runtime, context, state, env, event);
                while let Ok(event) = events.try_recv() {
                    handle_event(runtime, context, state, env, event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(wake.saturating_duration_since(Instant::now()));
            }
        }

        let due = state.borrow_mut().take_due(Instant::now());
        for id in due {
            if cancel.is_cancelled() {
                break;
            }
            context.with(|ctx| {
                let fired = fire_timer(&ctx, id).catch(&ctx);
                if let Err(caught) = fired {
                    report_uncaught(env, describe_caught(caught).0);
                }
            });
            drain_jobs(runtime, context, env);
        }
    }
}

fn handle_event(
    runtime: &Runtime,
    context: &Context,
    state: &Rc<RefCell<LoopState>>,
    env: &Environment,
    event: HostEvent,
) {
    match event {
        HostEvent::Http { id, outcome } => {
            state.borrow_mut().finish_request();
            context.with(|ctx| {
                let delivered = deliver_http(&ctx, id, outcome).catch(&ctx);
                if let Err(caught) = delivered {
                    report_uncaught(env, describe_caught(caught).0);
                }
            });
        }
    }
    drain_jobs(runtime, context, env);
}

/// Run queued promise jobs until none are left
fn drain_jobs(runtime: &Runtime, context: &Context, env: &Environment) {
    loop {
        match runtime.execute_pending_job() {
            Ok(true) => continue,
            Ok(false) => break,
            Err(_) => {
                let message = context.with(|ctx| describe_value(&ctx.catch()));
                report_uncaught(env, message);
            }
        }
    }
}

fn fire_timer(ctx: &Ctx<'_>, id: u32) -> rquickjs::Result<()> {
    let fire: Function = ctx.globals().get("__loonFireTimer")?;
    fire.call::<_, ()>((id,))
}

fn deliver_http(ctx: &Ctx<'_>, id: u32, outcome: HttpOutcome) -> rquickjs::Result<()> {
    let done: Function = ctx.globals().get("__loonHttpDone")?;
    match outcome {
        Ok((response, body)) => {
            let response = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
            let (text, bytes) = match body {
                ResponseBody::Text(text) => (Some(text), None),
                ResponseBody::Binary(bytes) => (
                    None,
                    Some(bytes.into_iter().map(i32::from).collect::<Vec<i32>>()),
                ),
            };
            done.call::<_, ()>((id, None::<String>, Some(response), text, bytes))
        }
        Err(e) => done.call::<_, ()>((
            id,
            Some(e.to_string()),
            None::<String>,
            None::<String>,
            None::<Vec<i32>>,
        )),
    }
}

fn report_uncaught(env: &Environment, message: String) {
    tracing::debug!("uncaught error in script callback: {}", message);
    env.logs().push(format!("[error] uncaught: {}", message));
}
