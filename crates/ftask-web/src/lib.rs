#![forbid(unsafe_code)]

//! Browser host binding for `ftask`.
//!
//! [`BrowserScheduler`] defers work with the global `setTimeout(f, 0)` and
//! `queueMicrotask(f)`, so it works in windows and workers alike.
//! [`ConsoleReporter`] sends uncaught task failures to `console.error`.
//! Both are only compiled on `wasm32` targets; the report formatting is
//! host-independent and tested natively.

#[cfg(target_arch = "wasm32")]
mod browser;

#[cfg(target_arch = "wasm32")]
pub use browser::{BrowserScheduler, ConsoleReporter, install_panic_hook, task_queue};

use ftask::ErrorReport;

/// Render a report the way the host console shows uncaught errors.
#[must_use]
pub fn format_report(report: &ErrorReport) -> String {
    format!("Uncaught error in {}: {}", report.function_name, report.error)
}
