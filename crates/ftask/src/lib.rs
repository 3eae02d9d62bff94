#![forbid(unsafe_code)]

//! Revocable callbacks, signals, and task-queue helpers for single-threaded
//! host runtimes.
//!
//! # Role in FrankenTask
//! `ftask` is the host-independent core. It never talks to a real event loop;
//! every deferral goes through an injected [`Scheduler`], so the same code runs
//! against the browser (`ftask-web`) or the deterministic [`ManualScheduler`].
//!
//! # Primary responsibilities
//! - **Callback**: a revocable holder of one function, replaceable only through
//!   its [`CallbackController`].
//! - **ByteCallback**: an allocate-then-commit pair of functions for handing a
//!   single reusable byte buffer from producer to consumer.
//! - **Signal**: a listener set fired by a [`SignalController`]; each listener
//!   runs as its own deferred task.
//! - **TaskQueue**: `queue_task` / `queue_microtask` with error isolation, so a
//!   failing deferred call is reported instead of unwinding into the host.
//!
//! # Capability split
//! Producers keep the controller and hand out the facade. Facades
//! ([`Callback`], [`ByteCallback`], [`Signal`]) only invoke, inspect, and
//! subscribe. Controllers replace, revoke, and dispatch. Nothing converts a
//! facade back into its controller.

pub mod byte_callback;
pub mod callback;
pub mod error;
pub mod listener;
pub mod reporter;
pub mod scheduler;
pub mod signal;
pub mod task;

pub use byte_callback::{
    Allocation, ByteCallback, ByteCallbackConfig, ByteCallbackController, ByteLength,
    UniqueByteCallbackController,
};
pub use callback::{Callback, CallbackConfig, CallbackController, UniqueCallbackController};
pub use error::{ErrorKind, TaskError};
pub use listener::{Listener, Outcome};
pub use reporter::{CollectingReporter, ErrorReport, ErrorReporter, TracingReporter};
pub use scheduler::{ManualScheduler, Scheduler, SchedulerConfig, Task, TurnStats};
pub use signal::{Signal, SignalController};
pub use task::{TaskQueue, TaskSpec};
