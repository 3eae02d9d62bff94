#![forbid(unsafe_code)]

//! `queue_task` / `queue_microtask` with error isolation.
//!
//! [`TaskQueue`] pairs a [`Scheduler`] with an [`ErrorReporter`]. Every body it
//! defers is wrapped in an isolation boundary: an `Err` outcome or a panic is
//! handed to [`ErrorReporter::top_level`] and the scheduler only ever sees a
//! task that returns normally. By the time deferred work runs there is no
//! synchronous caller left, so nothing propagates.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::trace;

use crate::error::{ErrorKind, TaskError, panic_message};
use crate::listener::{Listener, Outcome};
use crate::reporter::{ErrorReport, ErrorReporter, TracingReporter};
use crate::scheduler::{Scheduler, Task};

const TASK_CALLBACK: &str = "queue_task callback";
const MICROTASK_CALLBACK: &str = "queue_microtask callback";

/// A deferred call and the argument it receives.
pub struct TaskSpec<A, O> {
    task: Box<dyn FnOnce(A) -> O>,
    args: A,
}

impl<A: 'static, O: Outcome + 'static> TaskSpec<A, O> {
    #[must_use]
    pub fn new(task: impl FnOnce(A) -> O + 'static, args: A) -> Self {
        Self {
            task: Box::new(task),
            args,
        }
    }

    fn into_body(self) -> impl FnOnce() -> O {
        let Self { task, args } = self;
        move || task(args)
    }
}

impl<O: Outcome + 'static> TaskSpec<(), O> {
    /// A task that takes no argument.
    #[must_use]
    pub fn from_fn(task: impl FnOnce() -> O + 'static) -> Self {
        Self::new(move |()| task(), ())
    }
}

impl<A: fmt::Debug, O> fmt::Debug for TaskSpec<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Scheduler plus reporter: the handle producers use to defer work.
///
/// Cloning shares the same scheduler and reporter.
#[derive(Clone)]
pub struct TaskQueue {
    scheduler: Rc<dyn Scheduler>,
    reporter: Rc<dyn ErrorReporter>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Queue on `scheduler`, reporting failures through [`TracingReporter`].
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            reporter: Rc::new(TracingReporter),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Rc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn reporter(&self) -> &Rc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Defer `task` to a later turn of the event loop.
    pub fn queue_task<O: Outcome + 'static>(&self, task: impl FnOnce() -> O + 'static) {
        trace!("queue_task");
        self.scheduler
            .queue_task(self.isolate(TASK_CALLBACK, move || outcome(TASK_CALLBACK, task())));
    }

    /// Defer `task` to the end of the current synchronous execution.
    pub fn queue_microtask<O: Outcome + 'static>(&self, task: impl FnOnce() -> O + 'static) {
        trace!("queue_microtask");
        self.scheduler.queue_microtask(self.isolate(MICROTASK_CALLBACK, move || {
            outcome(MICROTASK_CALLBACK, task())
        }));
    }

    /// [`queue_task`](Self::queue_task) for a task that carries its argument.
    pub fn queue_task_with<A: 'static, O: Outcome + 'static>(&self, spec: TaskSpec<A, O>) {
        self.queue_task(spec.into_body());
    }

    /// [`queue_microtask`](Self::queue_microtask) for a task that carries its
    /// argument.
    pub fn queue_microtask_with<A: 'static, O: Outcome + 'static>(&self, spec: TaskSpec<A, O>) {
        self.queue_microtask(spec.into_body());
    }

    /// Defer `listener.invoke(args)` to a later turn. A revoked or failing
    /// listener is reported, never propagated.
    pub fn queue_invoke<A: 'static>(&self, listener: Rc<dyn Listener<A>>, args: A) {
        self.scheduler
            .queue_task(self.isolate(TASK_CALLBACK, move || listener.invoke(args)));
    }

    /// Hand a synchronous error to the reporter on its way back to the caller.
    #[must_use]
    pub fn rethrow(&self, function_name: &'static str, error: TaskError) -> TaskError {
        self.reporter.rethrow(ErrorReport::new(function_name, error))
    }

    fn isolate(
        &self,
        function_name: &'static str,
        body: impl FnOnce() -> Result<(), TaskError> + 'static,
    ) -> Task {
        let reporter = Rc::clone(&self.reporter);
        Box::new(move || {
            let error = match catch_unwind(AssertUnwindSafe(body)) {
                Ok(Ok(())) => return,
                Ok(Err(error)) => error,
                Err(payload) => TaskError::new(
                    function_name,
                    ErrorKind::Panicked(panic_message(payload.as_ref())),
                ),
            };
            reporter.top_level(ErrorReport::new(function_name, error));
        })
    }
}

fn outcome<O: Outcome>(function_name: &'static str, value: O) -> Result<(), TaskError> {
    value
        .into_outcome()
        .map_err(|msg| TaskError::new(function_name, ErrorKind::Failed(msg)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::scheduler::ManualScheduler;
    use std::cell::{Cell, RefCell};

    fn harness() -> (Rc<ManualScheduler>, Rc<CollectingReporter>, TaskQueue) {
        let scheduler = Rc::new(ManualScheduler::new());
        let reporter = Rc::new(CollectingReporter::new());
        let queue = TaskQueue::new(scheduler.clone()).with_reporter(reporter.clone());
        (scheduler, reporter, queue)
    }

    #[test]
    fn task_runs_on_a_later_turn() {
        let (scheduler, reporter, queue) = harness();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        queue.queue_task(move || ran_clone.set(true));

        assert!(!ran.get());
        scheduler.run_until_idle().unwrap();
        assert!(ran.get());
        assert!(reporter.is_empty());
    }

    #[test]
    fn microtask_runs_before_task() {
        let (scheduler, _reporter, queue) = harness();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let l2 = Rc::clone(&log);
        queue.queue_task(move || l1.borrow_mut().push("task"));
        queue.queue_microtask(move || l2.borrow_mut().push("microtask"));

        scheduler.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["microtask", "task"]);
    }

    #[test]
    fn error_is_reported_not_propagated() {
        let (scheduler, reporter, queue) = harness();
        queue.queue_task(|| -> Result<(), String> { Err("bad state".into()) });

        scheduler.run_until_idle().unwrap();
        let reports = reporter.top_level_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].function_name, "queue_task callback");
        assert_eq!(
            reports[0].error.kind(),
            &ErrorKind::Failed("bad state".into())
        );
    }

    #[test]
    fn panic_is_reported_and_next_task_still_runs() {
        let (scheduler, reporter, queue) = harness();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        queue.queue_microtask(|| -> () { panic!("listener exploded") });
        queue.queue_task(move || ran_clone.set(true));

        scheduler.run_until_idle().unwrap();
        assert!(ran.get());
        let reports = reporter.top_level_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].function_name, "queue_microtask callback");
        assert_eq!(
            reports[0].error.kind(),
            &ErrorKind::Panicked("listener exploded".into())
        );
    }

    #[test]
    fn spec_passes_its_argument() {
        let (scheduler, _reporter, queue) = harness();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        queue.queue_task_with(TaskSpec::new(move |n: i32| seen_clone.set(n * 2), 21));

        scheduler.run_until_idle().unwrap();
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn spec_from_fn_on_microtask_queue() {
        let (scheduler, _reporter, queue) = harness();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        queue.queue_microtask_with(TaskSpec::from_fn(move || ran_clone.set(true)));

        assert_eq!(scheduler.pending_microtasks(), 1);
        scheduler.run_microtasks().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn rethrow_goes_through_reporter() {
        let (_scheduler, reporter, queue) = harness();
        let err = queue.rethrow(
            "SignalController::dispatch",
            TaskError::new("Callback::invoke", ErrorKind::Revoked),
        );
        assert_eq!(err.trace(), &["Callback::invoke", "SignalController::dispatch"]);
        assert_eq!(reporter.rethrown_reports().len(), 1);
    }

    #[test]
    fn spec_debug_shows_args() {
        let spec = TaskSpec::new(|_: u8| (), 9u8);
        assert!(format!("{spec:?}").contains("args: 9"));
    }
}
