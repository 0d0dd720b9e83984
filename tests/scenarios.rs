//! End-to-end behaviour of change contexts and process views.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cfgstore::store::{CfgError, ConfigStore, ProcessHandle, ShmPool, Value, VarDef};

mod common;

#[test]
fn test_core_debug_scenario() {
    let store = common::sip_store();
    store.finalize().unwrap();
    let ctx = store.register_context(None);
    let mut worker = ProcessHandle::late_child_init(&store).unwrap();

    assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(1));
    ctx.set_now_int("core", None, "debug", 3).unwrap();
    assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(3));

    worker.update();
    assert_eq!(worker.get_by_name("core", "debug").unwrap(), Value::Int(3));

    let err = ctx.set_now_int("core", None, "debug", 99).unwrap_err();
    assert!(matches!(err, CfgError::OutOfRange { value: 99, min: 0, max: 9, .. }));
    assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(3));
}

#[test]
fn test_pool_instance_scenario() {
    let store = common::sip_store();
    store.finalize().unwrap();
    let ctx = store.register_context(None);

    ctx.add_group_instance("pool", 7).unwrap();
    ctx.set_now_str("pool", Some(7), "name", "east").unwrap();
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str(""));
    assert_eq!(ctx.get("pool", Some(7), "name").unwrap(), Value::str("east"));

    ctx.del_group_instance("pool", 7).unwrap();
    assert!(matches!(
        ctx.get("pool", Some(7), "name"),
        Err(CfgError::InstanceNotFound { id: 7, .. })
    ));
}

#[test]
fn test_commit_installs_one_block() {
    let store = common::sip_store();
    store.finalize().unwrap();
    let ctx = store.register_context(None);
    ctx.add_group_instance("pool", 5).unwrap();
    let before = store.block_version();

    ctx.set_delayed_str("pool", None, "name", "all").unwrap();
    ctx.set_delayed_str("pool", Some(5), "name", "five").unwrap();

    let records = ctx.diff().unwrap().records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].instance, None);
    assert_eq!(records[0].old, Value::str(""));
    assert_eq!(records[0].new, Value::str("all"));
    assert_eq!(records[1].instance, Some(5));
    assert_eq!(records[1].old, Value::str(""));
    assert_eq!(records[1].new, Value::str("five"));

    // nothing is visible until commit
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str(""));
    ctx.commit().unwrap();
    assert_eq!(store.block_version(), before + 1);
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str("all"));
    assert_eq!(ctx.get("pool", Some(5), "name").unwrap(), Value::str("five"));
    assert!(ctx.diff().unwrap().is_empty());
}

#[test]
fn test_rollback_leaves_no_trace() {
    let store = common::sip_store();
    store.finalize().unwrap();
    let ctx = store.register_context(None);
    let baseline = store.pool().used();
    let version = store.block_version();

    ctx.set_delayed_str("pool", None, "name", "a rather long pool name").unwrap();
    ctx.set_delayed_int("core", None, "debug", 8).unwrap();
    assert!(store.pool().used() > baseline);

    ctx.rollback().unwrap();
    assert_eq!(store.pool().used(), baseline);
    assert_eq!(store.block_version(), version);
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str(""));
    assert_eq!(ctx.get("core", None, "debug").unwrap(), Value::Int(1));
}

#[test]
fn test_failed_commit_keeps_block() {
    let store = common::sip_store();
    store.finalize().unwrap();
    let ctx = store.register_context(None);
    ctx.add_group_instance("pool", 1).unwrap();
    let version = store.block_version();

    ctx.set_delayed_str("pool", None, "name", "x").unwrap();
    ctx.set_delayed_str("pool", Some(1), "name", "y").unwrap();
    // instance disappears behind the pending change
    let other = store.register_context(None);
    other.del_group_instance("pool", 1).unwrap();

    assert!(matches!(ctx.commit(), Err(CfgError::InstanceNotFound { .. })));
    assert_eq!(store.block_version(), version + 1);
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str(""));
}

#[test]
fn test_allocation_failure_keeps_block() {
    let store = ConfigStore::new(ShmPool::new(4096));
    store
        .declare_group("pool", vec![VarDef::str("name", "")], None)
        .unwrap();
    store.finalize().unwrap();
    let ctx = store.register_context(None);
    let version = store.block_version();

    let huge = "x".repeat(8192);
    assert!(matches!(
        ctx.set_now_str("pool", None, "name", &huge),
        Err(CfgError::Allocation(_))
    ));
    assert_eq!(store.block_version(), version);
    assert_eq!(ctx.get("pool", None, "name").unwrap(), Value::str(""));
}

#[test]
fn test_readers_see_whole_commits() {
    let store = ConfigStore::new(ShmPool::unbounded());
    store
        .declare_group("pair", vec![VarDef::int("a", 0), VarDef::int("b", 0)], None)
        .unwrap();
    store.finalize().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut reader = ProcessHandle::child_no_cb_init(&store).unwrap();
                let g = store.group_id("pair").unwrap();
                let mut checks = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    reader.update_no_cbs();
                    assert_eq!(reader.get_int(g, 0), reader.get_int(g, 1));
                    checks += 1;
                    if finished {
                        break checks;
                    }
                }
            })
        })
        .collect();

    let ctx = store.register_context(None);
    for i in 1..=200 {
        ctx.set_delayed_int("pair", None, "a", i).unwrap();
        ctx.set_delayed_int("pair", None, "b", i).unwrap();
        ctx.commit().unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(ctx.get("pair", None, "a").unwrap(), Value::Int(200));
}
