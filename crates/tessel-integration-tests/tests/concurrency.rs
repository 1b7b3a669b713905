//! Integration tests for lock exclusivity across threads.

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::assert_state;
use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_framework::{FrameworkError, FrameworkSettings, LockCoordinator, LockItem};
use tessel_test::{BundleFixture, TestFramework};

fn short_timeout() -> FrameworkSettings {
    FrameworkSettings::default().with_lock_timeout(Duration::from_millis(100))
}

#[test]
fn test_lock_set_is_all_or_nothing() {
    let locks = LockCoordinator::new(Duration::from_millis(50));
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let shared = &locks;
    thread::scope(|s| {
        s.spawn(move || {
            let ctx = shared.lock("holder", &[LockItem::Bundle(BundleId(1))]).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            ctx.unlock();
        });
        held_rx.recv().unwrap();

        let err = locks
            .lock(
                "contender",
                &[LockItem::Bundle(BundleId(2)), LockItem::Bundle(BundleId(1))],
            )
            .unwrap_err();
        assert!(matches!(err, FrameworkError::LockTimeout { method: "contender", .. }));
        assert!(!locks.is_locked(LockItem::Bundle(BundleId(2))));
        assert!(locks.is_locked(LockItem::Bundle(BundleId(1))));

        release_tx.send(()).unwrap();
    });

    let ctx = locks
        .lock(
            "after",
            &[LockItem::Bundle(BundleId(1)), LockItem::Bundle(BundleId(2))],
        )
        .unwrap();
    assert_eq!(ctx.items().len(), 2);
}

#[test]
fn test_locks_are_reentrant_on_one_thread() {
    let locks = LockCoordinator::new(Duration::from_millis(50));
    let outer = locks
        .lock("outer", &[LockItem::FrameworkWiring])
        .unwrap();
    let inner = locks
        .lock("inner", &[LockItem::FrameworkWiring, LockItem::Bundle(BundleId(7))])
        .unwrap();

    assert_eq!(locks.context_stack(), vec!["outer", "inner"]);
    inner.unlock();
    assert!(locks.is_locked(LockItem::FrameworkWiring));
    assert!(!locks.is_locked(LockItem::Bundle(BundleId(7))));
    outer.unlock();
    assert!(!locks.is_locked(LockItem::FrameworkWiring));
}

#[test]
fn test_bundle_lock_blocks_concurrent_operation_on_same_bundle_only() {
    let t = TestFramework::with_settings(short_timeout());
    t.framework.launch().unwrap();
    let slow = t.install("mem:slow", BundleFixture::host("slow", "1.0.0").activator("slow"));
    let quick = t.install("mem:quick", BundleFixture::host("quick", "1.0.0").activator("quick"));
    assert!(t.framework.resolve_bundles(None).unwrap());

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    t.activators.script("slow").on_start(move |_| {
        entered_tx.send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
    });

    let framework = t.framework.clone();
    let starter = thread::spawn(move || framework.start(slow, LifecycleOptions::NONE));
    entered_rx.recv().unwrap();

    assert_state(&t, slow, BundleState::Starting);
    assert!(t.framework.locks().is_locked(LockItem::Bundle(slow)));
    let err = t
        .framework
        .stop(slow, LifecycleOptions::NONE)
        .unwrap_err();
    assert!(matches!(err, FrameworkError::LockTimeout { method: "stop", .. }));

    t.framework.start(quick, LifecycleOptions::NONE).unwrap();
    assert_state(&t, quick, BundleState::Active);

    release_tx.send(()).unwrap();
    starter.join().unwrap().unwrap();
    assert_state(&t, slow, BundleState::Active);
    assert!(!t.framework.locks().is_locked(LockItem::Bundle(slow)));
}

#[test]
fn test_activator_lookup_does_not_stall_concurrent_refresh() {
    let t = TestFramework::with_settings(
        FrameworkSettings::default().with_lock_timeout(Duration::from_secs(5)),
    );
    t.framework.launch().unwrap();
    let x = t.install(
        "mem:x",
        BundleFixture::host("x", "1.0.0").dynamic_import("*").activator("x"),
    );
    let y = t.install(
        "mem:y",
        BundleFixture::host("y", "1.0.0")
            .exports("dyn", "1.0.0")
            .class("dyn.Foo"),
    );
    assert!(t.framework.resolve_bundles(Some(&[x])).unwrap());
    assert_state(&t, y, BundleState::Installed);

    let (entered_tx, entered_rx) = mpsc::channel();
    let entered_tx = Mutex::new(entered_tx);
    let loads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&loads);
    let framework = t.framework.clone();
    t.activators.script("x").on_start(move |_| {
        let _ = entered_tx.lock().unwrap().send(());
        let waiting = Instant::now();
        while !framework.locks().is_locked(LockItem::FrameworkWiring)
            && waiting.elapsed() < Duration::from_secs(2)
        {
            thread::sleep(Duration::from_millis(5));
        }
        let found = framework.load_class(x, "dyn.Foo").unwrap();
        seen.lock().unwrap().push(found.map(|r| r.bundle));
    });

    let framework = t.framework.clone();
    let starter = thread::spawn(move || framework.start(x, LifecycleOptions::NONE));
    entered_rx.recv().unwrap();

    let refreshing = Instant::now();
    t.framework.refresh_bundles(Some(&[x])).unwrap();
    let elapsed = refreshing.elapsed();
    starter.join().unwrap().unwrap();

    assert!(elapsed < Duration::from_secs(4), "refresh stalled for {elapsed:?}");
    assert!(t.recorder.errors().is_empty(), "{:?}", t.recorder.errors());
    assert_state(&t, x, BundleState::Active);
    // The lookup inside the first start cannot resolve y while the refresh
    // holds the wiring lock; the restart under the refresh can.
    assert_eq!(*loads.lock().unwrap(), vec![None, Some(y)]);
    assert_state(&t, y, BundleState::Resolved);
    assert_eq!(t.activators.log(), vec!["start:x", "stop:x", "start:x"]);
}

#[test]
fn test_parallel_starts_and_stops_end_consistent() {
    let t = TestFramework::launched();
    let ids: Vec<BundleId> = (0..4)
        .map(|n| {
            let name = format!("b{n}");
            t.install(
                &format!("mem:{name}"),
                BundleFixture::host(&name, "1.0.0").activator(&name),
            )
        })
        .collect();
    let framework = &t.framework;

    thread::scope(|s| {
        for id in &ids {
            for _ in 0..3 {
                let id = *id;
                s.spawn(move || {
                    for _ in 0..5 {
                        framework.start(id, LifecycleOptions::NONE).unwrap();
                        framework.stop(id, LifecycleOptions::NONE).unwrap();
                    }
                });
            }
        }
    });

    for (n, id) in ids.iter().enumerate() {
        assert_state(&t, *id, BundleState::Resolved);
        let script = t.activators.script(&format!("b{n}"));
        assert_eq!(script.starts(), script.stops());
        assert!(script.starts() >= 1);
    }
    assert!(t.framework.locks().held_by_current_thread().is_empty());
}
