#![forbid(unsafe_code)]

//! The capability shape a [`Signal`](crate::Signal) accepts, and the
//! conversion from user return values into success or failure.

use std::fmt;

use crate::error::TaskError;

/// Something a signal can deliver to: it can be invoked and it can report
/// whether it has been revoked.
///
/// Listener identity is the `Rc` allocation it is registered through, so the
/// same `Rc<dyn Listener<A>>` added twice is one listener.
pub trait Listener<A> {
    fn invoke(&self, args: A) -> Result<(), TaskError>;

    fn is_revoked(&self) -> bool;
}

/// Return values that deferred work and listeners may produce.
///
/// `()` always succeeds. `Result<T, E>` fails with the rendered error.
pub trait Outcome {
    fn into_outcome(self) -> Result<(), String>;
}

impl Outcome for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<T, E: fmt::Display> Outcome for Result<T, E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_is_success() {
        assert_eq!(().into_outcome(), Ok(()));
    }

    #[test]
    fn result_maps_error_text() {
        let ok: Result<u32, String> = Ok(3);
        assert_eq!(ok.into_outcome(), Ok(()));
        let err: Result<(), &str> = Err("listener failed");
        assert_eq!(err.into_outcome(), Err("listener failed".to_string()));
    }
}
