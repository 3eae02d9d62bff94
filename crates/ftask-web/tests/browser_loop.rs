#![cfg(target_arch = "wasm32")]

//! Ordering on the real host event loop. Run with `wasm-pack test --node`
//! or `--headless --firefox`.

use std::cell::RefCell;
use std::rc::Rc;

use ftask::{Callback, CollectingReporter, SignalController, TaskQueue};
use ftask_web::BrowserScheduler;
use js_sys::Promise;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::wasm_bindgen_test;

fn queue(reporter: &Rc<CollectingReporter>) -> TaskQueue {
    TaskQueue::new(Rc::new(BrowserScheduler::new())).with_reporter(reporter.clone())
}

/// Resolves once a task queued after everything else has run.
fn drained(queue: &TaskQueue) -> JsFuture {
    let promise = Promise::new(&mut |resolve, _reject| {
        queue.queue_task(move || {
            let _ = resolve.call0(&JsValue::NULL);
        });
    });
    JsFuture::from(promise)
}

#[wasm_bindgen_test]
async fn microtask_runs_before_task() {
    let reporter = Rc::new(CollectingReporter::new());
    let queue = queue(&reporter);
    let log = Rc::new(RefCell::new(Vec::new()));

    let task_log = Rc::clone(&log);
    queue.queue_task(move || task_log.borrow_mut().push("task"));
    let micro_log = Rc::clone(&log);
    queue.queue_microtask(move || micro_log.borrow_mut().push("microtask"));
    log.borrow_mut().push("sync");

    drained(&queue).await.unwrap();
    assert_eq!(*log.borrow(), vec!["sync", "microtask", "task"]);
    assert!(reporter.is_empty());
}

#[wasm_bindgen_test]
async fn failing_listener_is_reported_on_the_host_loop() {
    let reporter = Rc::new(CollectingReporter::new());
    let queue = queue(&reporter);
    let controller: SignalController<u32> = SignalController::new(queue.clone());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let ok = Callback::new(move |n: u32| seen_clone.borrow_mut().push(n));
    let bad = Callback::new(|_: u32| -> Result<(), String> { Err("nope".into()) });
    controller.signal().add_callback(&bad);
    controller.signal().add_callback(&ok);

    assert_eq!(controller.dispatch(3), 2);
    drained(&queue).await.unwrap();

    assert_eq!(*seen.borrow(), vec![3]);
    assert_eq!(reporter.top_level_reports().len(), 1);
}
