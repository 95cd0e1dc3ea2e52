//! Native capability functions exposed to the script prelude
//!
//! The prelude (`prelude.js`) receives these as a private `__host` object and
//! builds the script-facing globals (`$persistentStore`, `$httpClient`,
//! `$notification`, `$done`, ...) on top of them. Values crossing the
//! boundary are plain strings, numbers and JSON text.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::{CaughtError, Ctx, Function, Object, Value};
use serde_json::json;

use super::event_loop::{timer_delay, HostEvent, LoopState};
use crate::common::Error;
use crate::env::{Environment, HttpMethod, HttpRequest, Notification};

/// Script-facing globals built over `__host`
const PRELUDE: &str = include_str!("prelude.js");

/// Install the capability surface into a fresh context
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    env: Arc<Environment>,
    state: Rc<RefCell<LoopState>>,
) -> rquickjs::Result<()> {
    let host = Object::new(ctx.clone())?;

    // Initial values of $script, $loon, $request, $response, $environment, $argument
    let init = {
        let env = env.clone();
        Function::new(ctx.clone(), move || -> String {
            json!({
                "script": env.context(),
                "loon": env.device(),
                "request": env.request(),
                "response": env.response(),
                "environment": env.environment_params(),
                "argument": env.argument(),
            })
            .to_string()
        })?
    };
    host.set("init", init)?;

    let log = {
        let env = env.clone();
        Function::new(ctx.clone(), move |line: String| env.logs().push(line))?
    };
    host.set("log", log)?;

    install_store(ctx, &host, &env)?;
    install_notification(ctx, &host, &env)?;
    install_http(ctx, &host, &env, &state)?;
    install_timers(ctx, &host, &state)?;
    install_config(ctx, &host, &env)?;
    install_utils(ctx, &host, &env)?;

    let done = {
        let env = env.clone();
        Function::new(ctx.clone(), move |payload: Option<String>| {
            let payload = payload.and_then(|text| serde_json::from_str(&text).ok());
            env.complete(payload);
        })?
    };
    host.set("done", done)?;

    ctx.globals().set("__host", host)?;
    ctx.eval::<Value, _>(PRELUDE)?;
    Ok(())
}

fn install_store<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    env: &Arc<Environment>,
) -> rquickjs::Result<()> {
    let write = {
        let env = env.clone();
        Function::new(ctx.clone(), move |value: String, key: Option<String>| -> bool {
            env.store_write(&value, key.as_deref())
        })?
    };
    host.set("storeWrite", write)?;

    let read = {
        let env = env.clone();
        Function::new(ctx.clone(), move |key: Option<String>| -> Option<String> {
            env.store_read(key.as_deref())
        })?
    };
    host.set("storeRead", read)?;

    let clear = {
        let env = env.clone();
        Function::new(ctx.clone(), move || -> bool { env.store_clear() })?
    };
    host.set("storeClear", clear)?;
    Ok(())
}

fn install_notification<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    env: &Arc<Environment>,
) -> rquickjs::Result<()> {
    let env = env.clone();
    let notify = Function::new(
        ctx.clone(),
        move |title: String,
              subtitle: String,
              body: String,
              attachment: Option<String>,
              delay: f64| {
            let attachment = attachment.and_then(|text| serde_json::from_str(&text).ok());
            let notification = Notification::new(title, subtitle, body)
                .with_attachment(attachment)
                .with_delay_secs(delay);
            env.post_notification(notification);
        },
    )?;
    host.set("notify", notify)
}

fn install_http<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    env: &Arc<Environment>,
    state: &Rc<RefCell<LoopState>>,
) -> rquickjs::Result<()> {
    let env = env.clone();
    let state = state.clone();
    let http = Function::new(ctx.clone(), move |method: String, params: String| -> u32 {
        let (id, sender) = state.borrow_mut().start_request();

        let request = HttpMethod::parse(&method)
            .ok_or_else(|| Error::InvalidRequest(format!("unsupported method '{}'", method)))
            .and_then(|method| {
                let params: serde_json::Value = serde_json::from_str(&params)?;
                HttpRequest::from_params(method, &params, env.http().default_timeout())
            });

        match request {
            Ok(request) => env.http_request(request, move |outcome| {
                let _ = sender.send(HostEvent::Http { id, outcome });
            }),
            Err(e) => {
                env.logs().push(format!("[http] request failed: {}", e));
                // Still answered through the loop so the callback never runs synchronously.
                let _ = sender.send(HostEvent::Http { id, outcome: Err(e) });
            }
        }
        id
    })?;
    host.set("http", http)
}

fn install_timers<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    state: &Rc<RefCell<LoopState>>,
) -> rquickjs::Result<()> {
    let set_timer = {
        let state = state.clone();
        Function::new(ctx.clone(), move |delay_ms: f64| -> u32 {
            state.borrow_mut().add_timer(timer_delay(delay_ms))
        })?
    };
    host.set("setTimer", set_timer)?;

    let clear_timer = {
        let state = state.clone();
        Function::new(ctx.clone(), move |id: u32| state.borrow_mut().clear_timer(id))?
    };
    host.set("clearTimer", clear_timer)
}

fn install_config<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    env: &Arc<Environment>,
) -> rquickjs::Result<()> {
    let get = {
        let env = env.clone();
        Function::new(ctx.clone(), move || -> String { env.policy().to_json() })?
    };
    host.set("configGet", get)?;

    let select = {
        let env = env.clone();
        Function::new(ctx.clone(), move |group: String, choice: String| -> bool {
            env.policy().select(&group, &choice);
            true
        })?
    };
    host.set("configSelect", select)?;

    let sub_policies = {
        let env = env.clone();
        Function::new(ctx.clone(), move |group: String| -> Vec<String> {
            env.policy().sub_policies(&group)
        })?
    };
    host.set("subPolicies", sub_policies)?;

    let selected = {
        let env = env.clone();
        Function::new(ctx.clone(), move |group: String| -> String {
            env.policy().selected(&group)
        })?
    };
    host.set("selectedPolicy", selected)?;

    let running_model = {
        let env = env.clone();
        Function::new(ctx.clone(), move |model: f64| -> bool {
            model.is_finite()
                && model.fract() == 0.0
                && env.policy().set_running_model(model as i64)
        })?
    };
    host.set("setRunningModel", running_model)
}

fn install_utils<'js>(
    ctx: &Ctx<'js>,
    host: &Object<'js>,
    env: &Arc<Environment>,
) -> rquickjs::Result<()> {
    let geoip = {
        let env = env.clone();
        Function::new(ctx.clone(), move |ip: String| -> String { env.geoip(&ip) })?
    };
    host.set("geoip", geoip)?;

    let ipasn = {
        let env = env.clone();
        Function::new(ctx.clone(), move |ip: String| -> String { env.ipasn(&ip) })?
    };
    host.set("ipasn", ipasn)?;

    let ipaso = {
        let env = env.clone();
        Function::new(ctx.clone(), move |ip: String| -> String { env.ipaso(&ip) })?
    };
    host.set("ipaso", ipaso)?;

    let ungzip = {
        let env = env.clone();
        Function::new(ctx.clone(), move |bytes: Vec<i32>| -> Vec<i32> {
            let bytes: Vec<u8> = bytes.into_iter().map(|b| b as u8).collect();
            env.ungzip(&bytes).into_iter().map(i32::from).collect()
        })?
    };
    host.set("ungzip", ungzip)
}

/// Message and stack of a caught JavaScript error
pub(crate) fn describe_caught(caught: CaughtError<'_>) -> (String, Option<String>) {
    match caught {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Uncaught exception".to_string());
            (message, exception.stack().filter(|s| !s.trim().is_empty()))
        }
        CaughtError::Value(value) => (describe_value(&value), None),
        CaughtError::Error(error) => (error.to_string(), None),
    }
}

/// String form of an arbitrary thrown value
pub(crate) fn describe_value(value: &Value<'_>) -> String {
    value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| "<unprintable value>".to_string())
}

/// Convert a caught error from the top-level pass into a run error
pub(crate) fn caught_to_error(caught: CaughtError<'_>) -> Error {
    let (message, stack) = describe_caught(caught);
    Error::script_exception(message, stack)
}
