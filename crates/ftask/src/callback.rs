#![forbid(unsafe_code)]

//! Revocable callbacks and their controllers.
//!
//! # Design
//!
//! A [`Callback<A, R>`] is a cheap handle onto a shared slot holding at most
//! one `Fn(A) -> R`. Clones share the slot, so every holder observes
//! replacement and revocation at once. The slot is only reachable for writing
//! through a controller:
//!
//! - [`CallbackController`]: hands out the same facade every time; `replace`
//!   and `revoke` act on it.
//! - [`UniqueCallbackController`]: every `callback()` call mints a fresh facade
//!   and revokes the previous one, so at most one live facade exists.
//!
//! # Invariants
//!
//! 1. `invoke` on an empty slot fails with [`ErrorKind::Revoked`] and never
//!    calls anything.
//! 2. The function is cloned out of the slot before it runs, so it may
//!    replace or revoke its own callback mid-call.
//! 3. A facade cannot be turned back into its controller.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ErrorKind, TaskError};
use crate::listener::{Listener, Outcome};

type Handler<A, R> = Rc<dyn Fn(A) -> R>;

/// Typed construction parameter for callbacks.
pub struct CallbackConfig<A, R = ()> {
    invoke: Option<Handler<A, R>>,
}

impl<A, R> Clone for CallbackConfig<A, R> {
    fn clone(&self) -> Self {
        Self {
            invoke: self.invoke.clone(),
        }
    }
}

impl<A, R> fmt::Debug for CallbackConfig<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("revoked", &self.invoke.is_none())
            .finish()
    }
}

impl<A: 'static, R: 'static> CallbackConfig<A, R> {
    #[must_use]
    pub fn new(invoke: impl Fn(A) -> R + 'static) -> Self {
        Self {
            invoke: Some(Rc::new(invoke)),
        }
    }

    /// A configuration with no function.
    #[must_use]
    pub fn revoked() -> Self {
        Self { invoke: None }
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.invoke.is_none()
    }
}

struct CallbackSlot<A, R> {
    handler: RefCell<Option<Handler<A, R>>>,
}

impl<A, R> CallbackSlot<A, R> {
    fn call(&self, args: A) -> Result<R, TaskError> {
        let handler = self.handler.borrow().clone();
        match handler {
            Some(handler) => Ok(handler(args)),
            None => Err(TaskError::new("Callback::invoke", ErrorKind::Revoked)),
        }
    }

    fn set(&self, handler: Option<Handler<A, R>>) {
        *self.handler.borrow_mut() = handler;
    }

    fn is_empty(&self) -> bool {
        self.handler.borrow().is_none()
    }
}

impl<A, R: Outcome> Listener<A> for CallbackSlot<A, R> {
    fn invoke(&self, args: A) -> Result<(), TaskError> {
        self.call(args)?
            .into_outcome()
            .map_err(|msg| TaskError::new("Callback::invoke", ErrorKind::Failed(msg)))
    }

    fn is_revoked(&self) -> bool {
        self.is_empty()
    }
}

/// Read-only facade over a revocable function.
pub struct Callback<A = (), R = ()> {
    slot: Rc<CallbackSlot<A, R>>,
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("revoked", &self.slot.is_empty())
            .finish()
    }
}

impl<A: 'static, R: 'static> Callback<A, R> {
    /// Wrap a bare function.
    #[must_use]
    pub fn new(invoke: impl Fn(A) -> R + 'static) -> Self {
        Self::from_config(CallbackConfig::new(invoke))
    }

    /// A callback that fails every invocation.
    #[must_use]
    pub fn revoked() -> Self {
        Self::from_config(CallbackConfig::revoked())
    }

    #[must_use]
    pub fn from_config(config: CallbackConfig<A, R>) -> Self {
        Self {
            slot: Rc::new(CallbackSlot {
                handler: RefCell::new(config.invoke),
            }),
        }
    }

    /// Call the wrapped function and return its result.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Revoked`] when no function is set.
    pub fn invoke(&self, args: A) -> Result<R, TaskError> {
        self.slot.call(args)
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.slot.is_empty()
    }

    /// Whether both handles share one slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<A: 'static, R: Outcome + 'static> Callback<A, R> {
    /// This callback as a signal listener. Every call returns the same
    /// allocation, so registering it twice is a no-op.
    #[must_use]
    pub fn listener(&self) -> Rc<dyn Listener<A>> {
        self.slot.clone()
    }
}

/// Owner of a [`Callback`]'s slot.
pub struct CallbackController<A = (), R = ()> {
    callback: Callback<A, R>,
}

impl<A, R> fmt::Debug for CallbackController<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackController")
            .field("callback", &self.callback)
            .finish()
    }
}

impl<A: 'static, R: 'static> CallbackController<A, R> {
    #[must_use]
    pub fn new(config: CallbackConfig<A, R>) -> Self {
        Self {
            callback: Callback::from_config(config),
        }
    }

    /// The facade to hand to consumers. Always the same slot.
    #[must_use]
    pub fn callback(&self) -> Callback<A, R> {
        self.callback.clone()
    }

    /// Swap the function every holder of the facade will call.
    pub fn replace(&self, config: CallbackConfig<A, R>) {
        debug!(revoked = config.is_revoked(), "callback replaced");
        self.callback.slot.set(config.invoke);
    }

    pub fn revoke(&self) {
        self.replace(CallbackConfig::revoked());
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.callback.is_revoked()
    }
}

/// Controller that keeps at most one live facade.
///
/// Each [`callback`](Self::callback) call revokes the facade handed out
/// before it.
pub struct UniqueCallbackController<A = (), R = ()> {
    invoke: Option<Handler<A, R>>,
    current: Callback<A, R>,
}

impl<A, R> fmt::Debug for UniqueCallbackController<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueCallbackController")
            .field("revoked", &self.invoke.is_none())
            .field("current", &self.current)
            .finish()
    }
}

impl<A: 'static, R: 'static> UniqueCallbackController<A, R> {
    #[must_use]
    pub fn new(config: CallbackConfig<A, R>) -> Self {
        Self {
            invoke: config.invoke,
            current: Callback::revoked(),
        }
    }

    /// Mint a new facade over the current function, revoking the previous one.
    pub fn callback(&mut self) -> Callback<A, R> {
        let fresh = Callback::from_config(CallbackConfig {
            invoke: self.invoke.clone(),
        });
        self.current.slot.set(None);
        self.current = fresh.clone();
        debug!("unique callback reissued");
        fresh
    }

    /// Swap the stored function and the one behind the live facade.
    pub fn replace(&mut self, config: CallbackConfig<A, R>) {
        self.invoke = config.invoke;
        self.current.slot.set(self.invoke.clone());
    }

    pub fn revoke(&mut self) {
        self.replace(CallbackConfig::revoked());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn invoke_returns_function_result() {
        let cb = Callback::new(|x: i32| x * 3);
        assert_eq!(cb.invoke(7), Ok(21));
        assert!(!cb.is_revoked());
    }

    #[test]
    fn revoked_callback_fails() {
        let cb: Callback<i32, i32> = Callback::revoked();
        assert!(cb.is_revoked());
        let err = cb.invoke(1).unwrap_err();
        assert!(err.is_revoked());
        assert_eq!(err.function(), "Callback::invoke");
    }

    #[test]
    fn controller_revoke_is_seen_by_every_clone() {
        let controller = CallbackController::new(CallbackConfig::new(|s: String| s.len()));
        let a = controller.callback();
        let b = a.clone();
        assert!(a.ptr_eq(&controller.callback()));
        assert_eq!(b.invoke("four".to_string()), Ok(4));

        controller.revoke();
        assert!(controller.is_revoked());
        assert!(a.is_revoked());
        assert!(b.invoke("x".to_string()).unwrap_err().is_revoked());
    }

    #[test]
    fn controller_replace_swaps_function() {
        let controller = CallbackController::new(CallbackConfig::new(|x: u32| x + 1));
        let cb = controller.callback();
        controller.replace(CallbackConfig::new(|x: u32| x * 10));
        assert_eq!(cb.invoke(4), Ok(40));

        controller.revoke();
        controller.replace(CallbackConfig::new(|x: u32| x));
        assert_eq!(cb.invoke(4), Ok(4));
    }

    #[test]
    fn callback_may_revoke_itself_while_running() {
        let controller = Rc::new(CallbackController::<(), ()>::new(CallbackConfig::revoked()));
        let inner = Rc::clone(&controller);
        controller.replace(CallbackConfig::new(move |()| inner.revoke()));

        let cb = controller.callback();
        assert_eq!(cb.invoke(()), Ok(()));
        assert!(cb.is_revoked());
    }

    #[test]
    fn unique_controller_revokes_previous_facade() {
        let mut controller = UniqueCallbackController::new(CallbackConfig::new(|x: i32| -x));
        let first = controller.callback();
        assert_eq!(first.invoke(2), Ok(-2));

        let second = controller.callback();
        assert!(first.is_revoked());
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.invoke(5), Ok(-5));
    }

    #[test]
    fn unique_controller_replace_updates_live_facade_only() {
        let mut controller = UniqueCallbackController::new(CallbackConfig::new(|x: i32| x));
        let old = controller.callback();
        let live = controller.callback();

        controller.replace(CallbackConfig::new(|x: i32| x + 100));
        assert_eq!(live.invoke(1), Ok(101));
        assert!(old.is_revoked());

        controller.revoke();
        assert!(live.is_revoked());
        let next = controller.callback();
        assert!(next.is_revoked());
    }

    #[test]
    fn listener_maps_outcome() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        let cb = Callback::new(move |n: u8| -> Result<(), String> {
            calls_clone.set(calls_clone.get() + 1);
            if n == 0 { Err("zero".into()) } else { Ok(()) }
        });
        let listener = cb.listener();
        assert_eq!(listener.invoke(1), Ok(()));
        let err = listener.invoke(0).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Failed("zero".into()));
        assert_eq!(calls.get(), 2);
        assert!(Rc::ptr_eq(&listener, &cb.listener()));
    }

    #[test]
    fn config_debug_and_clone() {
        let config: CallbackConfig<(), ()> = CallbackConfig::new(|()| ());
        let copy = config.clone();
        assert!(!copy.is_revoked());
        assert!(format!("{config:?}").contains("revoked: false"));
        let cb = Callback::from_config(copy);
        assert!(format!("{cb:?}").contains("Callback"));
    }
}
