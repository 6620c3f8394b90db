//! # Managed process entry.
//!
//! One [`ManagedProcess`] exists per supervised process. It is shared as
//! [`ProcessRef`] between the registry, the caller of
//! [`Guardian::start`](crate::Guardian::start) and the exit watcher.
//!
//! ## Ownership
//! ```text
//! Guardian::start ──► Spawn::spawn() ──► Child ──► watch_exit() task (owns Child)
//!                                                      │ child.wait()
//!                                                      ▼
//!                     ManagedProcess.exit ◄──── watch::Sender<Option<ExitInfo>>
//! ```
//! The live handle stays with the watcher task, so nothing else can reap the
//! process; everybody else observes exit through the watch channel. The handle is
//! dropped as soon as the process has been reaped.
//!
//! ## Rules
//! - `attachment` moves only `Unattached → GroupAttached | ManuallyTracked`.
//! - `managed` goes `true → false` once, when the entry leaves supervision.
//! - The exit is observed (and `Exited` published) exactly once. If the wait
//!   itself fails, no exit is recorded and the entry keeps looking alive.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::{Bus, Event, EventKind};
use crate::process::SpawnSpec;

/// Shared handle to a managed process.
pub type ProcessRef = Arc<ManagedProcess>;

/// How termination will reach a process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentState {
    /// Registered, attach step not run yet.
    Unattached = 0,
    /// Member of a kill-on-close grouping object or a signalable process group.
    GroupAttached = 1,
    /// Terminated through descendant walks and per-pid signals.
    ManuallyTracked = 2,
}

impl AttachmentState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AttachmentState::GroupAttached,
            2 => AttachmentState::ManuallyTracked,
            _ => AttachmentState::Unattached,
        }
    }
}

/// Exit bookkeeping recorded by the exit watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Terminating signal (Unix only).
    pub signal: Option<i32>,
    /// When the exit was observed.
    pub at: Instant,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            at: Instant::now(),
        }
    }

    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Write side of the exit watch, held by the exit watcher task.
pub(crate) struct ExitNotifier(watch::Sender<Option<ExitInfo>>);

impl ExitNotifier {
    /// Records the exit; receivers waiting in [`ManagedProcess::wait`] wake up.
    pub(crate) fn notify(&self, info: ExitInfo) {
        self.0.send_replace(Some(info));
    }
}

/// One supervised process.
#[derive(Debug)]
pub struct ManagedProcess {
    pid: u32,
    program: Arc<str>,
    spec: SpawnSpec,
    started_at: SystemTime,
    started: Instant,
    attachment: AtomicU8,
    managed: AtomicBool,
    metadata: DashMap<String, String>,
    survivors: OnceLock<Vec<u32>>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ManagedProcess {
    pub(crate) fn new(pid: u32, spec: SpawnSpec) -> (Self, ExitNotifier) {
        let (tx, rx) = watch::channel(None);
        let process = Self {
            pid,
            program: Arc::from(spec.program()),
            spec,
            started_at: SystemTime::now(),
            started: Instant::now(),
            attachment: AtomicU8::new(AttachmentState::Unattached as u8),
            managed: AtomicBool::new(true),
            metadata: DashMap::new(),
            survivors: OnceLock::new(),
            exit: rx,
        };
        (process, ExitNotifier(tx))
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program name, shared with events.
    pub fn program(&self) -> Arc<str> {
        Arc::clone(&self.program)
    }

    /// The spec the process was started from.
    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    /// Wall-clock registration time.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Time since registration, or total lifetime once exited.
    pub fn runtime(&self) -> Duration {
        match self.exit_info() {
            Some(info) => info.at.saturating_duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    pub fn attachment(&self) -> AttachmentState {
        AttachmentState::from_u8(self.attachment.load(Ordering::Acquire))
    }

    /// Moves `Unattached → state`. Returns false if the entry was already attached.
    pub(crate) fn mark_attached(&self, state: AttachmentState) -> bool {
        if state == AttachmentState::Unattached {
            return false;
        }
        self.attachment
            .compare_exchange(
                AttachmentState::Unattached as u8,
                state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// True while the guardian supervises this process.
    pub fn is_managed(&self) -> bool {
        self.managed.load(Ordering::Acquire)
    }

    /// Clears `managed`. Returns true for the call that made the transition.
    pub(crate) fn release(&self) -> bool {
        self.managed.swap(false, Ordering::AcqRel)
    }

    /// Exit bookkeeping, once the process has exited.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_info().and_then(|info| info.code)
    }

    /// Waits until the process exits.
    ///
    /// Returns `None` only if the exit watcher went away without observing the
    /// exit (runtime shutting down).
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut rx = self.exit.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(info) => *info,
            Err(_closed) => None,
        }
    }

    /// Waits up to `timeout` for exit. Returns true if the process is gone.
    ///
    /// An exit that can no longer be observed counts as not gone.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.has_exited() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, self.wait()).await, Ok(Some(_)))
    }

    /// Group members that were still alive when this process was reaped.
    pub(crate) fn survivors(&self) -> &[u32] {
        self.survivors.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Records the survivors once; later calls are ignored.
    pub(crate) fn record_survivors(&self, pids: Vec<u32>) {
        let _ = self.survivors.set(pids);
    }

    /// Resident memory in bytes, while running and where the platform reports it.
    pub fn memory_usage(&self) -> Option<u64> {
        if self.has_exited() {
            return None;
        }
        crate::native::resident_bytes(self.pid)
    }

    /// Sets a host annotation, returning the previous value.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.metadata.insert(key.into(), value.into())
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|v| v.value().clone())
    }

    pub fn remove_metadata(&self, key: &str) -> Option<String> {
        self.metadata.remove(key).map(|(_, v)| v)
    }

    /// Copy of all annotations.
    pub fn metadata_snapshot(&self) -> HashMap<String, String> {
        self.metadata
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

/// Spawns the task that owns `child`, reaps it and publishes `Exited`.
///
/// `on_reaped` runs after the process was reaped and before the exit becomes
/// visible. When the wait fails the notifier is dropped unused: the process
/// may still be running, so no exit is recorded.
pub(crate) fn watch_exit<F>(
    mut child: Child,
    process: ProcessRef,
    notifier: ExitNotifier,
    bus: Bus,
    on_reaped: F,
) -> JoinHandle<()>
where
    F: FnOnce(&ManagedProcess) + Send + 'static,
{
    tokio::spawn(async move {
        let info = match child.wait().await {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                tracing::error!(pid = process.pid(), error = %e, "failed to wait for process");
                bus.publish(
                    Event::new(EventKind::OperationFailed)
                        .with_process(&process)
                        .with_operation("wait")
                        .with_error(e.to_string()),
                );
                return;
            }
        };
        drop(child);
        on_reaped(&process);
        notifier.notify(info);

        tracing::debug!(
            pid = process.pid(),
            program = %process.program(),
            code = ?info.code,
            signal = ?info.signal,
            "process exited"
        );
        bus.publish(
            Event::new(EventKind::Exited)
                .with_process(&process)
                .with_exit_code(info.code),
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_transitions_once() {
        let (p, _tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        assert_eq!(p.attachment(), AttachmentState::Unattached);

        assert!(p.mark_attached(AttachmentState::GroupAttached));
        assert!(!p.mark_attached(AttachmentState::ManuallyTracked));
        assert!(!p.mark_attached(AttachmentState::Unattached));
        assert_eq!(p.attachment(), AttachmentState::GroupAttached);
    }

    #[test]
    fn test_release_is_single_transition() {
        let (p, _tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        assert!(p.is_managed());
        assert!(p.release());
        assert!(!p.release());
        assert!(!p.is_managed());
    }

    #[test]
    fn test_metadata_bag() {
        let (p, _tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        assert_eq!(p.set_metadata("role", "worker"), None);
        assert_eq!(p.set_metadata("role", "leader"), Some("worker".into()));
        assert_eq!(p.metadata("role").as_deref(), Some("leader"));
        assert_eq!(p.metadata_snapshot().len(), 1);
        assert_eq!(p.remove_metadata("role").as_deref(), Some("leader"));
        assert!(p.metadata("role").is_none());
    }

    #[tokio::test]
    async fn test_wait_timeout_observes_notifier() {
        let (p, tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        assert!(!p.wait_timeout(Duration::ZERO).await);
        assert!(!p.wait_timeout(Duration::from_millis(20)).await);

        tx.notify(ExitInfo {
            code: Some(3),
            signal: None,
            at: Instant::now(),
        });
        assert!(p.wait_timeout(Duration::ZERO).await);
        assert_eq!(p.exit_code(), Some(3));
        assert!(p.memory_usage().is_none());
    }

    #[tokio::test]
    async fn test_unobserved_exit_is_not_an_exit() {
        let (p, tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        drop(tx);
        assert_eq!(p.wait().await, None);
        assert!(!p.has_exited());
        assert!(!p.wait_timeout(Duration::from_millis(20)).await);
    }

    #[test]
    fn test_survivors_recorded_once() {
        let (p, _tx) = ManagedProcess::new(1, SpawnSpec::new("x"));
        assert!(p.survivors().is_empty());
        p.record_survivors(vec![7, 8]);
        p.record_survivors(vec![9]);
        assert_eq!(p.survivors(), [7, 8]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watcher_runs_hook_before_exit_is_visible() {
        use crate::process::{CommandSpawner, Spawn};

        let spec = SpawnSpec::new("true");
        let child = CommandSpawner::new().spawn(&spec).unwrap();
        let (p, tx) = ManagedProcess::new(child.id().unwrap(), spec);
        let p = Arc::new(p);
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();

        let seen_exited = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&seen_exited);
        watch_exit(child, Arc::clone(&p), tx, bus, move |p| {
            flag.store(p.has_exited(), Ordering::SeqCst);
            p.record_survivors(vec![42]);
        })
        .await
        .unwrap();

        assert!(!seen_exited.load(Ordering::SeqCst));
        assert!(p.has_exited());
        assert_eq!(p.survivors(), [42]);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Exited);
    }
}
