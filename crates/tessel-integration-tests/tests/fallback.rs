//! Integration tests for dynamic imports and system-package delegation.

mod common;

use std::sync::Arc;

use common::assert_state;
use tessel_core::{BundleId, BundleState, LifecycleOptions};
use tessel_framework::package::class_path;
use tessel_framework::{FrameworkSettings, PackagePattern};
use tessel_test::{BundleFixture, MemoryContent, TestFramework};

#[test]
fn test_dynamic_import_finds_unwired_exporter() {
    let t = TestFramework::launched();
    let provider = t.install(
        "mem:provider",
        BundleFixture::host("provider", "1.0.0")
            .exports("plugins.impl", "1.0.0")
            .class("plugins.impl.Widget"),
    );
    let consumer = t.install(
        "mem:consumer",
        BundleFixture::host("consumer", "1.0.0").dynamic_import("plugins.*"),
    );

    let found = t
        .framework
        .load_class(consumer, "plugins.impl.Widget")
        .unwrap()
        .unwrap();

    assert_eq!(found.bundle, provider);
    assert_eq!(found.data, b"plugins.impl.Widget");
    assert_state(&t, provider, BundleState::Resolved);
    assert!(
        t.framework
            .wiring(t.revision_of(consumer))
            .unwrap()
            .required()
            .is_empty()
    );
}

#[test]
fn test_dynamic_import_ignores_packages_outside_pattern() {
    let t = TestFramework::launched();
    t.install(
        "mem:provider",
        BundleFixture::host("provider", "1.0.0")
            .exports("other.impl", "1.0.0")
            .class("other.impl.Widget"),
    );
    let consumer = t.install(
        "mem:consumer",
        BundleFixture::host("consumer", "1.0.0").dynamic_import("plugins.*"),
    );

    assert!(
        t.framework
            .load_class(consumer, "other.impl.Widget")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_dynamic_import_enforces_exporter_version() {
    let t = TestFramework::launched();
    t.install(
        "mem:old",
        BundleFixture::host("old", "1.0.0")
            .exports("plugins.impl", "1.0.0")
            .class("plugins.impl.Widget"),
    );
    let consumer = t.install(
        "mem:consumer",
        BundleFixture::host("consumer", "1.0.0").dynamic_import_in("plugins.*", "[2.0.0,3.0.0)"),
    );

    assert!(
        t.framework
            .load_class(consumer, "plugins.impl.Widget")
            .unwrap()
            .is_none()
    );

    let new = t.install(
        "mem:new",
        BundleFixture::host("new", "2.1.0")
            .exports("plugins.impl", "2.1.0")
            .class("plugins.impl.Widget"),
    );
    let found = t
        .framework
        .load_class(consumer, "plugins.impl.Widget")
        .unwrap()
        .unwrap();
    assert_eq!(found.bundle, new);
}

#[test]
fn test_mutual_wildcard_imports_terminate() {
    let t = TestFramework::launched();
    let left = t.install(
        "mem:left",
        BundleFixture::host("left", "1.0.0").dynamic_import("*"),
    );
    let right = t.install(
        "mem:right",
        BundleFixture::host("right", "1.0.0").dynamic_import("*"),
    );
    assert!(t.framework.resolve_bundles(None).unwrap());

    assert!(
        t.framework
            .load_class(left, "nowhere.Missing")
            .unwrap()
            .is_none()
    );
    assert!(
        t.framework
            .get_resource(right, "nowhere/missing.txt")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_mutual_wildcard_imports_still_serve_exports() {
    let t = TestFramework::launched();
    let left = t.install(
        "mem:left",
        BundleFixture::host("left", "1.0.0")
            .exports("left.api", "1.0.0")
            .class("left.api.Thing")
            .dynamic_import("*"),
    );
    let right = t.install(
        "mem:right",
        BundleFixture::host("right", "1.0.0").dynamic_import("*"),
    );

    let found = t
        .framework
        .load_class(right, "left.api.Thing")
        .unwrap()
        .unwrap();
    assert_eq!(found.bundle, left);
}

#[test]
fn test_dynamic_provider_gone_after_uninstall() {
    let t = TestFramework::launched();
    let provider = t.install(
        "mem:provider",
        BundleFixture::host("provider", "1.0.0")
            .exports("plugins.impl", "1.0.0")
            .class("plugins.impl.Widget"),
    );
    let consumer = t.install(
        "mem:consumer",
        BundleFixture::host("consumer", "1.0.0").dynamic_import("plugins.*"),
    );
    assert!(
        t.framework
            .load_class(consumer, "plugins.impl.Widget")
            .unwrap()
            .is_some()
    );

    t.framework.uninstall(provider).unwrap();

    assert!(t.framework.bundle(provider).is_none());
    assert!(
        t.framework
            .load_class(consumer, "plugins.impl.Widget")
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_dynamic_load_completes_lazy_activation_of_provider() {
    let t = TestFramework::launched();
    let provider = t.install(
        "mem:provider",
        BundleFixture::host("provider", "1.0.0")
            .exports("plugins.impl", "1.0.0")
            .class("plugins.impl.Widget")
            .activator("provider")
            .lazy(),
    );
    let consumer = t.install(
        "mem:consumer",
        BundleFixture::host("consumer", "1.0.0").dynamic_import("plugins.*"),
    );
    t.framework
        .start(provider, LifecycleOptions::ACTIVATION_POLICY)
        .unwrap();

    t.framework
        .load_class(consumer, "plugins.impl.Widget")
        .unwrap()
        .unwrap();

    assert_state(&t, provider, BundleState::Active);
    assert_eq!(t.activators.log(), vec!["start:provider"]);
}

#[test]
fn test_system_packages_come_from_system_bundle_first() {
    let system = Arc::new(MemoryContent::new());
    system.insert(&class_path("org.shared.Api"), b"system");
    let settings = FrameworkSettings::default()
        .with_system_package(PackagePattern::Exact("org.shared".into()));
    let t = TestFramework::with_system_content(settings, system);
    t.framework.launch().unwrap();
    let user = t.install(
        "mem:user",
        BundleFixture::host("user", "1.0.0")
            .entry(&class_path("org.shared.Api"), "shadow")
            .class("user.Main"),
    );

    let api = t
        .framework
        .load_class(user, "org.shared.Api")
        .unwrap()
        .unwrap();
    assert_eq!(api.bundle, BundleId::SYSTEM);
    assert_eq!(api.data, b"system");

    let own = t.framework.load_class(user, "user.Main").unwrap().unwrap();
    assert_eq!(own.bundle, user);
}

#[test]
fn test_bundles_can_import_system_packages() {
    let settings = FrameworkSettings::default()
        .with_system_package(PackagePattern::Exact("org.shared".into()));
    let t = TestFramework::with_settings(settings);
    t.framework.launch().unwrap();
    let user = t.install(
        "mem:user",
        BundleFixture::host("user", "1.0.0").imports("org.shared", "0.0.0"),
    );

    t.framework.start(user, LifecycleOptions::NONE).unwrap();

    let wiring = t.framework.wiring(t.revision_of(user)).unwrap();
    let system_revision = t.revision_of(BundleId::SYSTEM);
    assert_eq!(wiring.package_provider("org.shared"), Some(system_revision));
}
