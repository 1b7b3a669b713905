//! Integration tests for framework and bundle start levels.

mod common;

use common::assert_state;
use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_events::FrameworkEventKind;
use tessel_framework::FrameworkError;
use tessel_framework::collaborators::BundleStorage;
use tessel_test::{BundleFixture, TestFramework};

/// Three bundles at start levels 1, 2 and 3, all persistently started.
fn install_leveled(t: &TestFramework) -> [BundleId; 3] {
    let mut ids = [BundleId(0); 3];
    for ((slot, level), name) in ids.iter_mut().zip(1..=3).zip(["one", "two", "three"]) {
        let id = t.install(
            &format!("mem:{name}"),
            BundleFixture::host(name, "1.0.0").activator(name),
        );
        t.framework.set_bundle_start_level_blocking(id, level).unwrap();
        t.framework.start(id, LifecycleOptions::NONE).unwrap();
        *slot = id;
    }
    ids
}

#[test]
fn test_raising_and_lowering_walks_levels_in_order() {
    let t = TestFramework::launched();
    let [one, two, three] = install_leveled(&t);
    assert_eq!(t.activators.log(), vec!["start:one"]);
    assert_state(&t, two, BundleState::Installed);
    assert!(t.storage.is_persistently_started(three));

    t.framework.set_start_level_blocking(3).unwrap();

    assert_eq!(t.framework.start_level(), 3);
    assert_eq!(
        t.activators.log(),
        vec!["start:one", "start:two", "start:three"]
    );
    t.activators.clear_log();

    t.framework.set_start_level_blocking(1).unwrap();

    assert_eq!(t.framework.start_level(), 1);
    assert_eq!(t.activators.log(), vec!["stop:three", "stop:two"]);
    assert_state(&t, one, BundleState::Active);
    assert_state(&t, two, BundleState::Resolved);
    assert_state(&t, three, BundleState::Resolved);
    assert!(t.storage.is_persistently_started(three));
}

#[test]
fn test_not_persistently_started_bundles_stay_put() {
    let t = TestFramework::launched();
    let id = t.install("mem:idle", BundleFixture::host("idle", "1.0.0").activator("idle"));
    t.framework.set_bundle_start_level_blocking(id, 2).unwrap();

    t.framework.set_start_level_blocking(2).unwrap();

    assert_state(&t, id, BundleState::Installed);
    assert!(t.activators.log().is_empty());
}

#[test]
fn test_overlapping_changes_apply_in_request_order() {
    let t = TestFramework::launched();
    let [_, two, three] = install_leveled(&t);

    let up = t.framework.set_start_level(3).unwrap();
    let down = t.framework.set_start_level(1).unwrap();
    up.wait().unwrap();
    down.wait().unwrap();

    assert_eq!(t.framework.start_level(), 1);
    assert_eq!(
        t.activators.log(),
        vec![
            "start:one",
            "start:two",
            "start:three",
            "stop:three",
            "stop:two",
        ]
    );
    assert_state(&t, two, BundleState::Resolved);
    assert_state(&t, three, BundleState::Resolved);
}

#[test]
fn test_each_change_fires_start_level_changed() {
    let t = TestFramework::launched();
    t.recorder.clear();

    t.framework.set_start_level_blocking(4).unwrap();
    t.framework.set_start_level_blocking(2).unwrap();

    assert_eq!(
        t.recorder.framework_kinds(),
        vec![
            FrameworkEventKind::StartLevelChanged,
            FrameworkEventKind::StartLevelChanged,
        ]
    );
}

#[test]
fn test_bundle_level_change_starts_and_stops_bundle() {
    let t = TestFramework::launched();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0").activator("a"));
    t.framework.start(id, LifecycleOptions::NONE).unwrap();

    t.framework.set_bundle_start_level_blocking(id, 2).unwrap();

    assert_eq!(t.framework.bundle_start_level(id), 2);
    assert_state(&t, id, BundleState::Resolved);
    assert!(t.storage.is_persistently_started(id));

    t.framework.set_bundle_start_level_blocking(id, 1).unwrap();

    assert_state(&t, id, BundleState::Active);
    assert_eq!(t.activators.log(), vec!["start:a", "stop:a", "start:a"]);
}

#[test]
fn test_transient_start_above_level_is_rejected() {
    let t = TestFramework::launched();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0"));
    t.framework.set_bundle_start_level_blocking(id, 5).unwrap();

    let err = t
        .framework
        .start(id, LifecycleOptions::TRANSIENT)
        .unwrap_err();

    assert!(matches!(err, FrameworkError::IllegalState(_)));
    assert_state(&t, id, BundleState::Installed);
}

#[test]
fn test_invalid_levels_are_rejected() {
    let t = TestFramework::launched();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0"));

    assert!(matches!(
        t.framework.set_start_level(0),
        Err(FrameworkError::InvalidStartLevel(0))
    ));
    assert!(matches!(
        t.framework.set_bundle_start_level(id, 0),
        Err(FrameworkError::InvalidStartLevel(0))
    ));
    assert!(matches!(
        t.framework.set_bundle_start_level(BundleId::SYSTEM, 3),
        Err(FrameworkError::Unsupported { .. })
    ));
}

#[test]
fn test_activator_cannot_block_on_start_level_change() {
    let t = TestFramework::launched();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0").activator("a"));
    t.framework.set_bundle_start_level_blocking(id, 2).unwrap();
    t.framework.start(id, LifecycleOptions::NONE).unwrap();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
    let sink = std::sync::Arc::clone(&seen);
    t.activators.script("a").on_start(move |ctx| {
        let framework = ctx.framework().unwrap();
        let blocked = framework.set_start_level_blocking(3);
        let queued = framework.set_start_level(3).map(|_| ());
        *sink.lock().unwrap() = Some((blocked.is_err(), queued.is_ok()));
    });

    t.framework.set_start_level_blocking(2).unwrap();

    assert_eq!(*seen.lock().unwrap(), Some((true, true)));
    assert_state(&t, id, BundleState::Active);
}

#[test]
fn test_shutdown_stops_everything_in_reverse_level_order() {
    let t = TestFramework::launched();
    install_leveled(&t);
    t.framework.set_start_level_blocking(3).unwrap();
    t.activators.clear_log();

    t.framework.shutdown().unwrap();

    assert_eq!(t.framework.start_level(), 0);
    assert_eq!(
        t.activators.log(),
        vec!["stop:three", "stop:two", "stop:one"]
    );
    assert_eq!(t.framework.state(BundleId::SYSTEM), Some(BundleState::Resolved));
    assert_eq!(
        t.recorder.framework_kinds().last(),
        Some(&FrameworkEventKind::Stopped)
    );
}

#[tokio::test]
async fn test_pending_change_can_be_awaited() {
    let t = TestFramework::new();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0").activator("a"));
    t.framework.start(id, LifecycleOptions::NONE).unwrap();
    assert_state(&t, id, BundleState::Installed);

    t.framework.set_start_level(1).unwrap().done().await.unwrap();

    assert_eq!(t.framework.start_level(), 1);
    assert_state(&t, id, BundleState::Active);
}

#[tokio::test]
async fn test_blocking_forms_refuse_to_run_inside_runtime() {
    let t = TestFramework::new();
    let system_before = t.framework.state(BundleId::SYSTEM);

    assert!(matches!(
        t.framework.launch(),
        Err(FrameworkError::IllegalState(_))
    ));
    assert!(matches!(
        t.framework.set_start_level_blocking(2),
        Err(FrameworkError::IllegalState(_))
    ));
    assert!(matches!(
        t.framework.shutdown(),
        Err(FrameworkError::IllegalState(_))
    ));
    assert_eq!(t.framework.state(BundleId::SYSTEM), system_before);
    assert!(t.recorder.framework_kinds().is_empty());

    assert!(matches!(
        t.framework.set_start_level(1).unwrap().wait(),
        Err(FrameworkError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_async_launch_and_shutdown() {
    let t = TestFramework::new();
    let id = t.install("mem:a", BundleFixture::host("a", "1.0.0").activator("a"));
    t.framework.start(id, LifecycleOptions::NONE).unwrap();

    t.framework.launch_async().await.unwrap();

    assert_eq!(t.framework.start_level(), 1);
    assert_eq!(t.framework.state(BundleId::SYSTEM), Some(BundleState::Active));
    assert_state(&t, id, BundleState::Active);

    t.framework.shutdown_async().await.unwrap();

    assert_eq!(t.framework.start_level(), 0);
    assert_state(&t, id, BundleState::Resolved);
    assert_eq!(t.framework.state(BundleId::SYSTEM), Some(BundleState::Resolved));
    assert_eq!(t.activators.log(), vec!["start:a", "stop:a"]);
}
