//! Integration tests for the guardian API.
//!
//! These tests spawn real processes (`sleep`, `sh`, `true`) and verify:
//! - capacity limits and the capacity gate
//! - kill-all and dispose idempotence under concurrency
//! - the post-dispose contract
//! - exit observation and background cleanup
//! - the sticky fallback to manual tracking

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{count, drain, eventually, fast_config, wait_for};
use procguard::{
    AttachmentState, CommandSpawner, EventKind, GuardError, Guardian, GuardianConfig,
    ManagedProcess, Spawn, SpawnSpec, Terminator,
};
use tokio_util::sync::CancellationToken;

fn sleeper() -> SpawnSpec {
    SpawnSpec::new("sleep").arg("30")
}

#[tokio::test]
async fn test_capacity_scenario() {
    let cfg = GuardianConfig {
        max_managed_processes: 2,
        ..fast_config()
    };
    let guardian = Guardian::builder(cfg).build().unwrap();

    let a = guardian.start(sleeper()).await.unwrap();
    let b = guardian.start(sleeper()).await.unwrap();
    assert_ne!(a.pid(), b.pid());

    let err = guardian.start(sleeper()).await.unwrap_err();
    assert!(matches!(err, GuardError::CapacityExceeded { max: 2 }));
    assert_eq!(guardian.len(), 2);

    let killed = guardian.kill_all(Some(Duration::from_secs(2))).await;
    assert_eq!(killed, 2);
    assert!(guardian.is_empty());
    assert!(a.has_exited() && b.has_exited());
    assert!(!a.is_managed());

    guardian.dispose().await;
}

#[tokio::test]
async fn test_kill_all_is_idempotent() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();
    for _ in 0..3 {
        guardian.start(sleeper()).await.unwrap();
    }

    let (first, second) = tokio::join!(guardian.kill_all(None), guardian.kill_all(None));
    assert_eq!(first + second, 3);
    assert_eq!(guardian.kill_all(None).await, 0);
    assert!(guardian.is_empty());

    let events = drain(&mut rx);
    let failed = events
        .iter()
        .filter(|e| e.kind == EventKind::OperationFailed)
        .count();
    assert_eq!(failed, 0);
    let completed: u32 = events
        .iter()
        .filter(|e| e.kind == EventKind::CleanupCompleted)
        .filter_map(|e| e.succeeded)
        .sum();
    assert_eq!(completed, 3);

    guardian.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispose_tears_down_once() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();
    let mut started = Vec::new();
    for _ in 0..3 {
        started.push(guardian.start(sleeper()).await.unwrap());
    }

    let disposers: Vec<_> = (0..8)
        .map(|_| {
            let g = Arc::clone(&guardian);
            tokio::spawn(async move { g.dispose().await })
        })
        .collect();
    for res in futures::future::join_all(disposers).await {
        res.expect("dispose task");
    }

    assert!(guardian.is_disposed());
    assert!(guardian.is_empty());
    assert!(started.iter().all(|p| p.has_exited()));

    let events = drain(&mut rx);
    let cleanups = events
        .iter()
        .filter(|e| e.kind == EventKind::CleanupCompleted)
        .count();
    assert_eq!(cleanups, 1);
    assert!(events.iter().all(|e| e.kind != EventKind::OperationFailed));
}

#[tokio::test]
async fn test_post_dispose_contract() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let p = guardian.start(sleeper()).await.unwrap();
    guardian.dispose().await;

    let cancel = CancellationToken::new();
    let use_after = |r: Result<(), GuardError>| matches!(r, Err(GuardError::UseAfterDispose));

    assert!(use_after(guardian.start(sleeper()).await.map(drop)));
    assert!(use_after(guardian.start_bounded(sleeper(), &cancel).await.map(drop)));
    assert!(use_after(guardian.kill(p.pid(), None).await.map(drop)));
    assert!(use_after(guardian.remove(p.pid()).map(drop)));
    assert!(use_after(guardian.statistics().map(drop)));
    assert!(use_after(guardian.get(p.pid()).map(drop)));
    assert!(use_after(guardian.processes().map(drop)));
    assert!(use_after(guardian.sweep_exited().map(drop)));
    assert!(use_after(guardian.dispose_on_shutdown_signal()));

    assert_eq!(guardian.kill_all(None).await, 0);
    guardian.dispose().await;
    guardian.dispose_blocking();
    assert!(guardian.is_disposed());
}

#[tokio::test]
async fn test_cancelled_wait_never_spawns() {
    let spawned = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&spawned);
    let spawner = move |spec: &SpawnSpec| {
        counter.fetch_add(1, Ordering::SeqCst);
        CommandSpawner::new().spawn(spec)
    };

    let guardian = Guardian::builder(fast_config())
        .with_spawner(spawner)
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = guardian.start_bounded(sleeper(), &cancel).await.unwrap_err();
    assert!(matches!(err, GuardError::CancelledWait));
    assert_eq!(spawned.load(Ordering::SeqCst), 0);
    assert!(guardian.is_empty());

    let live = CancellationToken::new();
    let p = guardian.start_bounded(sleeper(), &live).await.unwrap();
    assert_eq!(spawned.load(Ordering::SeqCst), 1);
    assert!(guardian.is_managed(p.pid()));

    guardian.dispose().await;
}

#[tokio::test]
async fn test_exited_once_and_swept_within_one_interval() {
    let cfg = GuardianConfig {
        auto_cleanup: true,
        cleanup_interval: Duration::from_millis(100),
        ..fast_config()
    };
    let guardian = Guardian::builder(cfg).build().unwrap();
    let mut rx = guardian.subscribe();

    let p = guardian.start(SpawnSpec::new("true")).await.unwrap();
    let pid = p.pid();

    let mut events = Vec::new();
    let mut exited_at = None;
    let deadline = tokio::time::timeout(Duration::from_secs(3), async {
        while let Ok(ev) = rx.recv().await {
            if ev.kind == EventKind::Exited && ev.pid == Some(pid) {
                exited_at = Some(Instant::now());
            }
            let done = ev.kind == EventKind::Removed && ev.pid == Some(pid);
            events.push(ev);
            if done {
                break;
            }
        }
    })
    .await;
    assert!(deadline.is_ok(), "process was not swept");

    let swept_after = exited_at.expect("Exited before Removed").elapsed();
    assert!(swept_after < Duration::from_millis(400), "swept after {swept_after:?}");

    tokio::time::sleep(Duration::from_millis(250)).await;
    events.extend(drain(&mut rx));

    assert_eq!(count(&events, EventKind::Started, pid), 1);
    assert_eq!(count(&events, EventKind::Exited, pid), 1);
    assert_eq!(count(&events, EventKind::Removed, pid), 1);
    let removed = events
        .iter()
        .find(|e| e.kind == EventKind::Removed)
        .unwrap();
    assert_eq!(removed.reason.as_deref(), Some("exited"));
    assert_eq!(p.exit_code(), Some(0));
    assert!(!p.is_managed());
    assert!(!guardian.is_managed(pid));

    guardian.dispose().await;
}

/// Grouping engine that refuses every process.
struct Refusing(AtomicUsize);

impl Terminator for Refusing {
    fn name(&self) -> &'static str {
        "refusing"
    }

    fn attach(
        &self,
        process: &ManagedProcess,
        _child: &tokio::process::Child,
    ) -> Result<AttachmentState, GuardError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(GuardError::AttachFailure {
            pid: process.pid(),
            reason: "refused".into(),
        })
    }

    fn request_shutdown(&self, _process: &ManagedProcess) -> Result<(), GuardError> {
        unreachable!("no process is ever group-attached")
    }

    fn force_kill(&self, _process: &ManagedProcess) -> Result<usize, GuardError> {
        unreachable!("no process is ever group-attached")
    }
}

#[tokio::test]
async fn test_sticky_fallback_after_attach_failure() {
    let refusing = Arc::new(Refusing(AtomicUsize::new(0)));
    let guardian = Guardian::builder(fast_config())
        .with_grouping_engine(refusing.clone())
        .build()
        .unwrap();
    assert_eq!(guardian.active_engine(), "refusing");
    let mut rx = guardian.subscribe();

    let mut started = Vec::new();
    for _ in 0..3 {
        started.push(guardian.start(sleeper()).await.unwrap());
    }

    assert!(guardian.is_manual_tracking());
    assert_eq!(guardian.active_engine(), "tree-walk");
    assert_eq!(refusing.0.load(Ordering::SeqCst), 1);
    assert!(
        started
            .iter()
            .all(|p| p.attachment() == AttachmentState::ManuallyTracked)
    );

    let events = drain(&mut rx);
    let first = events
        .iter()
        .find(|e| e.kind == EventKind::ManualTrackingActivated)
        .expect("fallback event");
    assert!(first.reason.as_deref().unwrap().contains("refused"));
    assert_eq!(first.operation, Some("attach"));
    let switches = events.iter().filter(|e| e.operation == Some("attach")).count();
    assert_eq!(switches, 1);
    assert!(events.iter().all(|e| e.kind != EventKind::GroupAttached));

    assert_eq!(guardian.kill_all(None).await, 3);
    guardian.dispose().await;
}

#[tokio::test]
async fn test_default_engine_groups_processes() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();
    assert_eq!(guardian.active_engine(), "process-group");

    let p = guardian.start(sleeper()).await.unwrap();
    assert_eq!(p.attachment(), AttachmentState::GroupAttached);

    let ev = wait_for(&mut rx, Duration::from_secs(1), |e| {
        e.kind == EventKind::GroupAttached
    })
    .await
    .expect("GroupAttached");
    assert_eq!(ev.pid, Some(p.pid()));
    assert_eq!(ev.attachment, Some(AttachmentState::GroupAttached));

    assert!(guardian.kill(p.pid(), None).await.unwrap());
    assert!(p.has_exited());
    guardian.dispose().await;
}

#[tokio::test]
async fn test_spawn_failure_registers_nothing() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();

    let err = guardian
        .start(SpawnSpec::new("procguard-no-such-program"))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "spawn_failure");
    assert!(guardian.is_empty());

    let ev = wait_for(&mut rx, Duration::from_secs(1), |e| {
        e.kind == EventKind::OperationFailed
    })
    .await
    .expect("OperationFailed");
    assert_eq!(ev.operation, Some("start"));
    assert_eq!(ev.program.as_deref(), Some("procguard-no-such-program"));

    guardian.dispose().await;
}

#[tokio::test]
async fn test_remove_leaves_process_running() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();
    let p = guardian.start(sleeper()).await.unwrap();
    let pid = p.pid();

    assert!(guardian.remove(pid).unwrap());
    assert!(!guardian.remove(pid).unwrap());
    assert!(!p.is_managed());
    assert!(!guardian.kill(pid, None).await.unwrap());

    let ev = wait_for(&mut rx, Duration::from_secs(1), |e| e.kind == EventKind::Removed)
        .await
        .expect("Removed");
    assert_eq!(ev.reason.as_deref(), Some("removed"));

    guardian.dispose().await;
    assert!(!p.has_exited(), "removed processes survive disposal");

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();
    assert!(p.wait_timeout(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_statistics_and_metadata() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let a = guardian.start(sleeper()).await.unwrap();
    let b = guardian.start(SpawnSpec::new("true")).await.unwrap();
    a.set_metadata("role", "worker");

    assert!(b.wait_timeout(Duration::from_secs(2)).await);
    let stats = guardian.statistics().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.exited, 1);
    assert!(stats.memory_bytes > 0);

    let same = guardian.get(a.pid()).unwrap().expect("registered");
    assert_eq!(same.metadata("role").as_deref(), Some("worker"));
    assert_eq!(guardian.processes().unwrap().len(), 2);

    assert_eq!(guardian.sweep_exited().unwrap(), 1);
    assert_eq!(guardian.len(), 1);

    guardian.dispose().await;
}

#[tokio::test]
async fn test_kill_failure_propagation() {
    // Ignores SIGTERM; `sleep` inherits the ignored disposition.
    let stubborn = SpawnSpec::new("sh").args(["-c", "trap '' TERM; sleep 30"]);

    let cfg = GuardianConfig {
        force_kill_on_timeout: false,
        propagate_operation_errors: true,
        ..fast_config()
    };
    let guardian = Guardian::builder(cfg).build().unwrap();
    let p = guardian.start(stubborn.clone()).await.unwrap();
    // Let sh install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = guardian
        .kill(p.pid(), Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert_eq!(err.as_label(), "termination_timeout");
    assert!(guardian.is_managed(p.pid()), "failed kill keeps the entry");
    assert!(p.is_managed());

    let quiet = Guardian::builder(GuardianConfig {
        force_kill_on_timeout: false,
        ..fast_config()
    })
    .build()
    .unwrap();
    let q = quiet.start(stubborn).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!quiet.kill(q.pid(), Some(Duration::from_millis(200))).await.unwrap());
    assert!(quiet.is_managed(q.pid()));

    // Neither guardian may force these, so stop them directly.
    for pid in [p.pid(), q.pid()] {
        nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
    }
    assert!(eventually(Duration::from_secs(2), || p.has_exited() && q.has_exited()).await);
    guardian.dispose().await;
    quiet.dispose().await;
}

#[tokio::test]
async fn test_kill_failing_during_dispose_leaves_nothing_behind() {
    let cfg = GuardianConfig {
        force_kill_on_timeout: false,
        ..fast_config()
    };
    let guardian = Guardian::builder(cfg).build().unwrap();
    let p = guardian
        .start(SpawnSpec::new("sh").args(["-c", "trap '' TERM; sleep 30"]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pid = p.pid();
    let g = Arc::clone(&guardian);
    let kill = tokio::spawn(async move { g.kill(pid, Some(Duration::from_millis(500))).await });

    // dispose() finds the entry already taken by the pending kill.
    tokio::time::sleep(Duration::from_millis(100)).await;
    guardian.dispose().await;
    assert!(guardian.is_empty());

    assert!(!kill.await.unwrap().unwrap());
    assert!(guardian.is_empty());
    assert!(!guardian.is_managed(pid));
    assert!(!p.is_managed());
    assert!(eventually(Duration::from_secs(2), || p.has_exited()).await);
}

#[tokio::test]
async fn test_kill_all_on_empty_registry_reports_zero() {
    let guardian = Guardian::builder(fast_config()).build().unwrap();
    let mut rx = guardian.subscribe();

    assert_eq!(guardian.kill_all(None).await, 0);
    let ev = wait_for(&mut rx, Duration::from_secs(1), |e| {
        e.kind == EventKind::CleanupCompleted
    })
    .await
    .expect("CleanupCompleted");
    assert_eq!(ev.succeeded, Some(0));
    assert_eq!(ev.failed, Some(0));

    guardian.dispose().await;
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let err = Guardian::builder(GuardianConfig {
        max_managed_processes: 0,
        ..GuardianConfig::default()
    })
    .build()
    .unwrap_err();
    assert_eq!(err.as_label(), "invalid_config");
}

#[test]
fn test_build_requires_runtime() {
    let err = Guardian::builder(GuardianConfig::default())
        .build()
        .unwrap_err();
    assert!(matches!(err, GuardError::InvalidConfig { .. }));
}

#[test]
fn test_drop_without_dispose_kills_processes() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let process = rt.block_on(async {
        let guardian = Guardian::builder(fast_config()).build().unwrap();
        let p = guardian.start(sleeper()).await.unwrap();
        drop(guardian);
        p
    });

    let exited = rt.block_on(process.wait_timeout(Duration::from_secs(3)));
    assert!(exited, "drop guard must terminate managed processes");
}

#[test]
fn test_dispose_blocking_outside_runtime() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (guardian, p) = rt.block_on(async {
        let guardian = Guardian::builder(fast_config()).build().unwrap();
        let p = guardian.start(sleeper()).await.unwrap();
        (guardian, p)
    });

    guardian.dispose_blocking();
    assert!(guardian.is_disposed());
    assert!(p.has_exited());
}
