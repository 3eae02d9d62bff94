#![forbid(unsafe_code)]

//! Error reporting sinks.
//!
//! The core calls into an [`ErrorReporter`] but does not decide where reports
//! end up. Two entry points exist:
//!
//! - [`ErrorReporter::rethrow`]: an error is on its way back to a synchronous
//!   caller. The reporter may record it and returns the error wrapped with the
//!   reporting function's name.
//! - [`ErrorReporter::top_level`]: nobody is left to receive the error (it came
//!   out of deferred work). The report is terminal.

use std::cell::RefCell;

use tracing::{debug, error};

use crate::error::TaskError;

/// An error together with the function reporting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub function_name: &'static str,
    pub error: TaskError,
}

impl ErrorReport {
    #[must_use]
    pub fn new(function_name: &'static str, error: TaskError) -> Self {
        Self {
            function_name,
            error,
        }
    }
}

/// Sink for errors raised by callbacks, signals, and deferred tasks.
pub trait ErrorReporter {
    /// Record an error that propagates to a caller and return it with the
    /// reporting function added to its trace.
    fn rethrow(&self, report: ErrorReport) -> TaskError {
        report.error.context(report.function_name)
    }

    /// Record an error that cannot propagate any further.
    fn top_level(&self, report: ErrorReport);
}

/// Default reporter: forwards reports to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn rethrow(&self, report: ErrorReport) -> TaskError {
        debug!(
            function = report.function_name,
            error = %report.error,
            "rethrowing"
        );
        report.error.context(report.function_name)
    }

    fn top_level(&self, report: ErrorReport) {
        error!(
            function = report.function_name,
            error = %report.error,
            "uncaught error in deferred task"
        );
    }
}

/// Reporter that keeps every report in memory, for inspection by tests and
/// diagnostics overlays.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    top_level: RefCell<Vec<ErrorReport>>,
    rethrown: RefCell<Vec<ErrorReport>>,
}

impl CollectingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal reports received so far.
    #[must_use]
    pub fn top_level_reports(&self) -> Vec<ErrorReport> {
        self.top_level.borrow().clone()
    }

    /// Rethrown reports received so far.
    #[must_use]
    pub fn rethrown_reports(&self) -> Vec<ErrorReport> {
        self.rethrown.borrow().clone()
    }

    /// Drain the terminal reports.
    pub fn take_top_level(&self) -> Vec<ErrorReport> {
        std::mem::take(&mut *self.top_level.borrow_mut())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.top_level.borrow().is_empty() && self.rethrown.borrow().is_empty()
    }
}

impl ErrorReporter for CollectingReporter {
    fn rethrow(&self, report: ErrorReport) -> TaskError {
        let error = report.error.clone().context(report.function_name);
        self.rethrown.borrow_mut().push(report);
        error
    }

    fn top_level(&self, report: ErrorReport) {
        self.top_level.borrow_mut().push(report);
    }
}
