//! Per-process adoption and per-child callback delivery across threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use cfgstore::store::{ProcessHandle, Value};

mod common;

use common::TIMER_RUNS;

const CHILDREN: usize = 4;
const CHANGES: i32 = 25;

#[test]
fn test_every_child_runs_each_callback_once() {
    let every = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let store = common::callback_store(every.clone(), once.clone());
    store.register_children(CHILDREN);

    let written = Arc::new(Barrier::new(CHILDREN + 1));
    let children: Vec<_> = (0..CHILDREN)
        .map(|_| {
            let store = store.clone();
            let written = written.clone();
            thread::spawn(move || {
                let mut child = ProcessHandle::child_init(&store).unwrap();
                // adopt while the writer is still going
                child.update();
                written.wait();
                child.update();
                let last = child.get_by_name("tm", "timer").unwrap();
                child.child_destroy();
                (TIMER_RUNS.with(|runs| runs.get()), last)
            })
        })
        .collect();

    let ctx = store.register_context(None);
    for i in 1..=CHANGES {
        ctx.set_now_int("tm", None, "timer", i).unwrap();
        ctx.set_now_int("tm", None, "once", i).unwrap();
    }
    written.wait();

    for child in children {
        let (runs, last) = child.join().unwrap();
        assert_eq!(runs, CHANGES as usize);
        assert_eq!(last, Value::Int(CHANGES));
    }
    assert_eq!(every.load(Ordering::SeqCst), CHILDREN * CHANGES as usize);
    assert_eq!(once.load(Ordering::SeqCst), CHANGES as usize);
    assert_eq!(store.pending_callbacks(), 0);
}

#[test]
fn test_lagging_child_holds_callbacks() {
    let every = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let store = common::callback_store(every.clone(), once);
    store.register_children(2);
    let mut fast = ProcessHandle::child_init(&store).unwrap();
    let slow = ProcessHandle::child_init(&store).unwrap();
    let ctx = store.register_context(None);

    for i in 1..=3 {
        ctx.set_now_int("tm", None, "timer", i).unwrap();
    }
    assert_eq!(fast.update(), 3);
    // the slow child has not run them yet
    assert_eq!(store.pending_callbacks(), 3);
    assert_eq!(slow.version(), 1);

    slow.child_destroy();
    assert_eq!(store.pending_callbacks(), 0);
    assert_eq!(every.load(Ordering::SeqCst), 3);
}

#[test]
fn test_late_child_skips_earlier_callbacks() {
    let every = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let store = common::callback_store(every.clone(), once);
    let ctx = store.register_context(None);
    ctx.set_now_int("tm", None, "timer", 1).unwrap();

    let mut late = ProcessHandle::late_child_init(&store).unwrap();
    assert_eq!(late.get_by_name("tm", "timer").unwrap(), Value::Int(1));
    assert_eq!(late.update(), 0);

    ctx.set_now_int("tm", None, "timer", 2).unwrap();
    assert_eq!(late.update(), 1);
    assert_eq!(every.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unregistered_child_joins_late() {
    let every = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let store = common::callback_store(every, once);
    let mut child = ProcessHandle::child_init(&store).unwrap();
    assert!(child.runs_callbacks());

    let ctx = store.register_context(None);
    ctx.set_now_int("tm", None, "timer", 5).unwrap();
    assert_eq!(child.update(), 1);
}
