#![forbid(unsafe_code)]

//! Error type shared by every fallible operation in the crate.
//!
//! A [`TaskError`] records the [`ErrorKind`] plus the chain of functions the
//! error passed through, innermost first. Wrapping an error with
//! [`TaskError::context`] is how an outer operation claims it, so the rendered
//! message reads outermost to innermost:
//!
//! ```text
//! UniqueByteCallbackController::replace: ByteCallback::from_config: missing required field: invoke
//! ```

use std::fmt;

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A value was supplied but has the wrong shape (non-integer byte length,
    /// commit larger than the allocation, ...).
    InvalidArgument(String),
    /// A configuration left a required slot unspecified.
    MissingField(&'static str),
    /// The callback's function has been cleared by its controller.
    Revoked,
    /// `ByteCallback::invoke` was called with no outstanding allocation.
    NotAllocated,
    /// An allocation handle was used after a newer allocation or a commit.
    StaleAllocation,
    /// Deferred or invoked work returned an error.
    Failed(String),
    /// Deferred or invoked work panicked.
    Panicked(String),
    /// A scheduler run exceeded one of its configured limits.
    BudgetExceeded(&'static str),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::MissingField(field) => write!(f, "missing required field: {field}"),
            Self::Revoked => f.write_str("this callback has been revoked"),
            Self::NotAllocated => f.write_str("invoked without an outstanding allocation"),
            Self::StaleAllocation => f.write_str("allocation has been superseded"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::BudgetExceeded(limit) => write!(f, "budget exceeded: {limit}"),
        }
    }
}

/// Error carrying its kind and the functions it was raised through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    kind: ErrorKind,
    /// Innermost function first. Never empty.
    trace: Vec<&'static str>,
}

impl TaskError {
    /// Create an error raised by `function`.
    #[must_use]
    pub fn new(function: &'static str, kind: ErrorKind) -> Self {
        Self {
            kind,
            trace: vec![function],
        }
    }

    /// Wrap the error with the name of an outer function.
    #[must_use]
    pub fn context(mut self, function: &'static str) -> Self {
        if self.trace.last() != Some(&function) {
            self.trace.push(function);
        }
        self
    }

    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The function that raised the error.
    #[must_use]
    pub fn function(&self) -> &'static str {
        self.trace[0]
    }

    /// Functions the error passed through, innermost first.
    #[must_use]
    pub fn trace(&self) -> &[&'static str] {
        &self.trace
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.kind == ErrorKind::Revoked
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in self.trace.iter().rev() {
            write!(f, "{function}: ")?;
        }
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for TaskError {}

/// Render a panic payload the way `std` does for `&str` and `String` payloads.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reads_outermost_first() {
        let err = TaskError::new("ByteCallback::from_config", ErrorKind::MissingField("invoke"))
            .context("UniqueByteCallbackController::replace");
        assert_eq!(
            err.to_string(),
            "UniqueByteCallbackController::replace: ByteCallback::from_config: missing required field: invoke"
        );
        assert_eq!(err.function(), "ByteCallback::from_config");
    }

    #[test]
    fn context_skips_repeated_frame() {
        let err = TaskError::new("Callback::invoke", ErrorKind::Revoked).context("Callback::invoke");
        assert_eq!(err.trace(), &["Callback::invoke"]);
    }

    #[test]
    fn revoked_predicate() {
        assert!(TaskError::new("f", ErrorKind::Revoked).is_revoked());
        assert!(!TaskError::new("f", ErrorKind::NotAllocated).is_revoked());
    }

    #[test]
    fn kind_display() {
        assert_eq!(
            ErrorKind::InvalidArgument("byte length -1".into()).to_string(),
            "invalid argument: byte length -1"
        );
        assert_eq!(ErrorKind::Revoked.to_string(), "this callback has been revoked");
        assert_eq!(
            ErrorKind::BudgetExceeded("max_turns").to_string(),
            "budget exceeded: max_turns"
        );
    }

    #[test]
    fn panic_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
