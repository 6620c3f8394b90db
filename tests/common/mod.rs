//! Shared helpers for the guardian integration tests.

#![allow(dead_code)]

use std::time::Duration;

use procguard::{Event, EventKind, GuardianConfig};
use tokio::sync::broadcast;

/// Short timeouts, no background cleanup.
pub fn fast_config() -> GuardianConfig {
    GuardianConfig {
        max_managed_processes: 16,
        process_kill_timeout: Duration::from_millis(500),
        forced_exit_grace: Duration::from_secs(2),
        auto_cleanup: false,
        ..GuardianConfig::default()
    }
}

/// Receives events until `pred` matches or `within` expires.
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<Event>,
    within: Duration,
    mut pred: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return Some(ev),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collects every event already queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn count(events: &[Event], kind: EventKind, pid: u32) -> usize {
    events
        .iter()
        .filter(|e| e.kind == kind && e.pid == Some(pid))
        .count()
}

/// True once `pid` is gone or only a zombie is left of it.
#[cfg(target_os = "linux")]
pub fn is_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rfind(')')
            .and_then(|i| stat[i + 1..].split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}

/// Polls `cond` every 20ms until it holds or `within` expires.
pub async fn eventually<F>(within: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
