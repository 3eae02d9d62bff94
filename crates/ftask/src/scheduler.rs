#![forbid(unsafe_code)]

//! Host scheduler abstraction and a deterministic in-process event loop.
//!
//! # Design
//!
//! Everything in the crate that defers work does so through a [`Scheduler`]
//! supplied at construction. A scheduler exposes exactly two operations, the
//! ones a browser host provides: queue a macrotask and queue a microtask.
//!
//! [`ManualScheduler`] implements both on two FIFO queues and lets the caller
//! decide when the "event loop" turns:
//!
//! ```text
//! synchronous code            queue_task / queue_microtask
//!   → run_microtasks()        end of the current turn (checkpoint)
//!   → run_next_task()         one macrotask, then a checkpoint
//!   → run_until_idle()        checkpoint, then macrotasks until both queues drain
//! ```
//!
//! # Invariants
//!
//! 1. Microtasks queued during a turn run before the next macrotask.
//! 2. Macrotasks run in the order they were queued.
//! 3. A task is removed from its queue before it runs, so it may queue more
//!    work (including onto its own queue) without re-entrancy panics.
//!
//! # Failure Modes
//!
//! - **Runaway microtasks**: a microtask that keeps queueing microtasks never
//!   lets the checkpoint finish. [`SchedulerConfig::max_microtasks_per_checkpoint`]
//!   turns that into [`ErrorKind::BudgetExceeded`] instead of a hang.
//! - **Runaway macrotasks**: likewise bounded by [`SchedulerConfig::max_turns`]
//!   during [`ManualScheduler::run_until_idle`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use crate::error::{ErrorKind, TaskError};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Host deferred-execution primitive.
pub trait Scheduler {
    /// Run `task` on a later turn of the event loop.
    fn queue_task(&self, task: Task);

    /// Run `task` after the current synchronous execution, before the next
    /// macrotask.
    fn queue_microtask(&self, task: Task);
}

/// Limits for [`ManualScheduler`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Microtasks a single checkpoint may run before it gives up.
    pub max_microtasks_per_checkpoint: usize,
    /// Macrotasks a single `run_until_idle` may run before it gives up.
    pub max_turns: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_checkpoint: 100_000,
            max_turns: 1_000_000,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `FTASK_MAX_MICROTASKS` and `FTASK_MAX_TURNS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| get(key).and_then(|v| v.trim().parse::<usize>().ok());
        let mut config = Self::default();
        if let Some(limit) = parse("FTASK_MAX_MICROTASKS") {
            config.max_microtasks_per_checkpoint = limit;
        }
        if let Some(limit) = parse("FTASK_MAX_TURNS") {
            config.max_turns = limit;
        }
        config
    }

    #[must_use]
    pub fn with_max_microtasks_per_checkpoint(mut self, limit: usize) -> Self {
        self.max_microtasks_per_checkpoint = limit;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, limit: usize) -> Self {
        self.max_turns = limit;
        self
    }
}

/// Work performed by a [`ManualScheduler`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub tasks_run: usize,
    pub microtasks_run: usize,
}

impl TurnStats {
    fn absorb(&mut self, other: TurnStats) {
        self.tasks_run += other.tasks_run;
        self.microtasks_run += other.microtasks_run;
    }
}

/// Deterministic single-threaded event loop.
///
/// Use it behind an `Rc` so a [`TaskQueue`](crate::TaskQueue) can share it:
///
/// ```
/// use std::rc::Rc;
/// use ftask::{ManualScheduler, TaskQueue};
///
/// let scheduler = Rc::new(ManualScheduler::new());
/// let queue = TaskQueue::new(scheduler.clone());
/// queue.queue_task(|| println!("later"));
/// scheduler.run_until_idle().unwrap();
/// ```
pub struct ManualScheduler {
    config: SchedulerConfig,
    tasks: RefCell<VecDeque<Task>>,
    microtasks: RefCell<VecDeque<Task>>,
    total: Cell<TurnStats>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("config", &self.config)
            .field("pending_tasks", &self.pending_tasks())
            .field("pending_microtasks", &self.pending_microtasks())
            .field("total", &self.total.get())
            .finish()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            tasks: RefCell::new(VecDeque::new()),
            microtasks: RefCell::new(VecDeque::new()),
            total: Cell::new(TurnStats::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.pending_microtasks() == 0
    }

    /// Everything run since construction.
    #[must_use]
    pub fn total(&self) -> TurnStats {
        self.total.get()
    }

    /// Microtask checkpoint: run microtasks until the queue is empty,
    /// including ones queued by the microtasks themselves.
    pub fn run_microtasks(&self) -> Result<TurnStats, TaskError> {
        let mut stats = TurnStats::default();
        loop {
            if stats.microtasks_run >= self.config.max_microtasks_per_checkpoint
                && self.pending_microtasks() > 0
            {
                return Err(TaskError::new(
                    "ManualScheduler::run_microtasks",
                    ErrorKind::BudgetExceeded("max_microtasks_per_checkpoint"),
                ));
            }
            // Pop in its own statement so the borrow ends before the task runs.
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task();
            stats.microtasks_run += 1;
            self.record(TurnStats {
                tasks_run: 0,
                microtasks_run: 1,
            });
        }
        Ok(stats)
    }

    /// Run the oldest macrotask, if any, followed by a microtask checkpoint.
    pub fn run_next_task(&self) -> Result<TurnStats, TaskError> {
        let next = self.tasks.borrow_mut().pop_front();
        let Some(task) = next else {
            return Ok(TurnStats::default());
        };
        task();
        self.record(TurnStats {
            tasks_run: 1,
            microtasks_run: 0,
        });
        let mut stats = TurnStats {
            tasks_run: 1,
            microtasks_run: 0,
        };
        stats.absorb(
            self.run_microtasks()
                .map_err(|e| e.context("ManualScheduler::run_next_task"))?,
        );
        Ok(stats)
    }

    /// End the current turn, then keep turning the loop until both queues are
    /// empty.
    pub fn run_until_idle(&self) -> Result<TurnStats, TaskError> {
        let mut stats = self
            .run_microtasks()
            .map_err(|e| e.context("ManualScheduler::run_until_idle"))?;
        while self.pending_tasks() > 0 {
            if stats.tasks_run >= self.config.max_turns {
                return Err(TaskError::new(
                    "ManualScheduler::run_until_idle",
                    ErrorKind::BudgetExceeded("max_turns"),
                ));
            }
            stats.absorb(
                self.run_next_task()
                    .map_err(|e| e.context("ManualScheduler::run_until_idle"))?,
            );
        }
        trace!(
            tasks = stats.tasks_run,
            microtasks = stats.microtasks_run,
            "event loop idle"
        );
        Ok(stats)
    }

    fn record(&self, delta: TurnStats) {
        let mut total = self.total.get();
        total.absorb(delta);
        self.total.set(total);
    }
}

impl Scheduler for ManualScheduler {
    fn queue_task(&self, task: Task) {
        let mut tasks = self.tasks.borrow_mut();
        tasks.push_back(task);
        trace!(pending = tasks.len(), "macrotask queued");
    }

    fn queue_microtask(&self, task: Task) {
        let mut microtasks = self.microtasks.borrow_mut();
        microtasks.push_back(task);
        trace!(pending = microtasks.len(), "microtask queued");
    }
}
