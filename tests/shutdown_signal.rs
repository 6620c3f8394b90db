//! The shutdown-signal hook, in its own test binary: it raises SIGTERM at the
//! test process itself.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{eventually, fast_config, wait_for};
use procguard::{EventKind, Guardian, SpawnSpec};
use tokio::signal::unix::{SignalKind, signal};

#[tokio::test]
async fn test_sigterm_disposes_guardian() {
    // Keeps the default SIGTERM action (exit) away from the test process.
    let _keep = signal(SignalKind::terminate()).unwrap();

    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();
    let p = guardian
        .start(SpawnSpec::new("sleep").arg("30"))
        .await
        .unwrap();

    guardian.dispose_on_shutdown_signal().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

    wait_for(&mut rx, Duration::from_secs(2), |e| {
        e.kind == EventKind::ShutdownRequested
    })
    .await
    .expect("ShutdownRequested");

    assert!(eventually(Duration::from_secs(3), || guardian.is_disposed() && p.has_exited()).await);
    assert!(guardian.is_empty());
}

#[tokio::test]
async fn test_dispose_cancels_hook() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    guardian.dispose_on_shutdown_signal().unwrap();
    guardian.dispose().await;

    // The hook held only a weak reference and has been cancelled.
    assert_eq!(std::sync::Arc::strong_count(&guardian), 1);
    assert!(guardian.is_disposed());
}
