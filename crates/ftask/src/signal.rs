#![forbid(unsafe_code)]

//! One-to-many event dispatch.
//!
//! # Design
//!
//! A [`SignalController<A>`] owns a [`Signal<A>`] facade and a [`TaskQueue`].
//! Consumers register listeners on the facade; only the controller can
//! dispatch. Each dispatch queues one macrotask per live listener, so
//! listeners never run inside the dispatching call and a failing listener
//! cannot affect the others.
//!
//! # Invariants
//!
//! 1. Listener identity is the `Rc` allocation: adding the same listener twice
//!    keeps a single entry.
//! 2. Dispatch works on a snapshot. Listeners added or removed while a
//!    dispatch is being queued do not change that dispatch, and nothing is
//!    skipped or visited twice.
//! 3. The listener set is never borrowed while listener code runs, so
//!    listeners may add or remove listeners freely.
//!
//! # Failure Modes
//!
//! - **Revoked after dispatch**: a listener revoked between dispatch and its
//!   turn fails its deferred invoke; the failure goes to the reporter.
//! - **Listener leak**: revoked listeners stay registered until
//!   [`Signal::remove_all_revoked`] (or `remove`) prunes them. Dispatch skips
//!   them but does not drop them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::callback::Callback;
use crate::listener::{Listener, Outcome};
use crate::task::TaskQueue;

type ListenerRc<A> = Rc<dyn Listener<A>>;

fn same_listener<A>(a: &ListenerRc<A>, b: &ListenerRc<A>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

struct SignalInner<A> {
    listeners: RefCell<Vec<ListenerRc<A>>>,
}

/// Public subscription facade.
///
/// Cloning shares the same listener set.
pub struct Signal<A = ()> {
    inner: Rc<SignalInner<A>>,
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listener_count", &self.len())
            .finish()
    }
}

impl<A> Signal<A> {
    /// Number of registered listeners, revoked ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: 'static> Signal<A> {
    fn new() -> Self {
        Self {
            inner: Rc::new(SignalInner {
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register `listener`. Returns `false` if it was already registered.
    pub fn add(&self, listener: ListenerRc<A>) -> bool {
        if self.contains(&listener) {
            return false;
        }
        self.inner.listeners.borrow_mut().push(listener);
        true
    }

    /// Register a callback. Re-adding the same callback (or a clone of it) is a
    /// no-op.
    pub fn add_callback<R: Outcome + 'static>(&self, callback: &Callback<A, R>) -> bool {
        self.add(callback.listener())
    }

    /// Unregister `listener`. Returns whether it was registered.
    pub fn remove(&self, listener: &ListenerRc<A>) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    pub fn remove_callback<R: Outcome + 'static>(&self, callback: &Callback<A, R>) -> bool {
        self.remove(&callback.listener())
    }

    #[must_use]
    pub fn contains(&self, listener: &ListenerRc<A>) -> bool {
        self.inner
            .listeners
            .borrow()
            .iter()
            .any(|l| same_listener(l, listener))
    }

    /// Drop every listener that reports itself revoked. Returns how many were
    /// removed.
    pub fn remove_all_revoked(&self) -> usize {
        // `is_revoked` is listener code; ask it with the set unborrowed.
        let revoked: Vec<ListenerRc<A>> = self
            .snapshot()
            .into_iter()
            .filter(|l| l.is_revoked())
            .collect();
        if revoked.is_empty() {
            return 0;
        }
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| !revoked.iter().any(|r| same_listener(l, r)));
        let removed = before - listeners.len();
        trace!(removed, remaining = listeners.len(), "pruned revoked listeners");
        removed
    }

    fn snapshot(&self) -> Vec<ListenerRc<A>> {
        self.inner.listeners.borrow().clone()
    }
}

/// Owner of a [`Signal`]; the only way to fire it.
pub struct SignalController<A = ()> {
    signal: Signal<A>,
    queue: TaskQueue,
}

impl<A> fmt::Debug for SignalController<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalController")
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}

impl<A: Clone + 'static> SignalController<A> {
    #[must_use]
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            signal: Signal::new(),
            queue,
        }
    }

    /// The facade to hand to consumers.
    #[must_use]
    pub fn signal(&self) -> Signal<A> {
        self.signal.clone()
    }

    /// Queue one deferred invocation per live listener, each receiving a
    /// clone of `args`. Returns the number of invocations queued.
    #[doc(alias = "fire")]
    pub fn dispatch(&self, args: A) -> usize {
        let live: Vec<ListenerRc<A>> = self
            .signal
            .snapshot()
            .into_iter()
            .filter(|l| !l.is_revoked())
            .collect();
        let queued = live.len();
        for listener in live {
            self.queue.queue_invoke(listener, args.clone());
        }
        trace!(queued, "signal dispatched");
        queued
    }
}
