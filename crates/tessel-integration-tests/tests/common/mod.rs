//! Shared helpers for integration tests.

use tessel_core::{BundleId, BundleState};
use tessel_test::{BundleFixture, TestFramework};

/// Assert the lifecycle state of a bundle.
#[allow(dead_code)]
pub fn assert_state(t: &TestFramework, id: BundleId, expected: BundleState) {
    assert_eq!(t.framework.state(id), Some(expected), "state of bundle {id}");
}

/// Install `a` ← `b` ← `c`: `b` imports `a.api`, `c` imports `b.api`.
/// Each has an activator named after it.
#[allow(dead_code)]
pub fn install_chain(t: &TestFramework) -> [BundleId; 3] {
    let a = t.install(
        "mem:a",
        BundleFixture::host("a", "1.0.0")
            .exports("a.api", "1.0.0")
            .activator("a")
            .class("a.api.Service"),
    );
    let b = t.install(
        "mem:b",
        BundleFixture::host("b", "1.0.0")
            .imports("a.api", "[1.0.0,3.0.0)")
            .exports("b.api", "1.0.0")
            .activator("b"),
    );
    let c = t.install(
        "mem:c",
        BundleFixture::host("c", "1.0.0")
            .imports("b.api", "1.0.0")
            .activator("c"),
    );
    [a, b, c]
}
