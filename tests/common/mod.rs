//! Shared fixtures for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cfgstore::store::{ConfigStore, ShmPool, VarDef, VarFlags};

/// `core.debug` (0..9, default 1) and `pool.name` (default "").
#[allow(dead_code)]
pub fn sip_store() -> ConfigStore {
    let store = ConfigStore::new(ShmPool::new(1024 * 1024));
    store
        .declare_group("core", vec![VarDef::int("debug", 1).range(0, 9)], None)
        .unwrap();
    store
        .declare_group("pool", vec![VarDef::str("name", "")], None)
        .unwrap();
    store
}

/// `tm.timer` runs a per-child callback in every process, `tm.once` in one.
#[allow(dead_code)]
pub fn callback_store(every: Arc<AtomicUsize>, once: Arc<AtomicUsize>) -> ConfigStore {
    let store = ConfigStore::new(ShmPool::unbounded());
    store
        .declare_group(
            "tm",
            vec![
                VarDef::int("timer", 0).on_set_child(move |_, _| {
                    every.fetch_add(1, Ordering::SeqCst);
                    TIMER_RUNS.with(|runs| runs.set(runs.get() + 1));
                }),
                VarDef::int("once", 0)
                    .flags(VarFlags::CB_ONCE)
                    .on_set_child(move |_, _| {
                        once.fetch_add(1, Ordering::SeqCst);
                    }),
            ],
            None,
        )
        .unwrap();
    store.finalize().unwrap();
    store
}

thread_local! {
    /// `tm.timer` callbacks run on the current thread.
    pub static TIMER_RUNS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}
