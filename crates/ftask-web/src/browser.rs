#![forbid(unsafe_code)]

//! `wasm-bindgen` glue onto the host event loop.
//!
//! Only compiled on `wasm32` targets. `wasm32-unknown-unknown` aborts on
//! panic, so a panicking task ends the module; `Err` outcomes are still
//! isolated and reported.

use std::rc::Rc;

use ftask::{ErrorReport, ErrorReporter, Scheduler, Task, TaskQueue};
use js_sys::{Array, Function, Reflect};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::format_report;

fn global_function(name: &str) -> Option<Function> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}

fn console_error(msg: &str) {
    let global = js_sys::global();
    let Ok(console) = Reflect::get(&global, &"console".into()) else {
        return;
    };
    let Ok(error) = Reflect::get(&console, &"error".into()) else {
        return;
    };
    let Ok(error_fn) = error.dyn_into::<Function>() else {
        return;
    };
    let _ = error_fn.call1(&console, &JsValue::from_str(msg));
}

/// Call a global scheduling function such as `setTimeout` with `args`.
fn schedule(name: &str, args: &Array) {
    let Some(function) = global_function(name) else {
        console_error(&format!("{name} is not available; task dropped"));
        return;
    };
    if let Err(err) = function.apply(&js_sys::global(), args) {
        console_error(&format!("{name} failed: {err:?}"));
    }
}

/// Route Rust panics to `console.error` before the module aborts.
pub fn install_panic_hook() {
    use std::sync::Once;

    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = if let Some(loc) = info.location() {
                format!(
                    "panic at {}:{}:{}: {info}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                )
            } else {
                format!("panic: {info}")
            };
            console_error(&msg);
        }));
    });
}

/// [`Scheduler`] backed by the host's global `setTimeout` and
/// `queueMicrotask`.
///
/// Macrotasks are subject to the host's timer clamping.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserScheduler;

impl BrowserScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for BrowserScheduler {
    fn queue_task(&self, task: Task) {
        let handler = Closure::once_into_js(move || task());
        schedule("setTimeout", &Array::of2(&handler, &JsValue::from(0)));
    }

    fn queue_microtask(&self, task: Task) {
        let handler = Closure::once_into_js(move || task());
        schedule("queueMicrotask", &Array::of1(&handler));
    }
}

/// Reporter that writes uncaught task failures to `console.error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ErrorReporter for ConsoleReporter {
    fn top_level(&self, report: ErrorReport) {
        console_error(&format_report(&report));
    }
}

/// A [`TaskQueue`] on the host event loop, reporting to the console.
#[must_use]
pub fn task_queue() -> TaskQueue {
    install_panic_hook();
    TaskQueue::new(Rc::new(BrowserScheduler)).with_reporter(Rc::new(ConsoleReporter))
}
