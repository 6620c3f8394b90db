//! # Termination engine: two-phase protocol and sticky fallback.
//!
//! Native mechanisms sit behind one [`Terminator`] trait. An [`Engine`] holds
//! the preferred grouping terminator (if any) and the manual tree-walk
//! terminator, and runs the same protocol on top of either:
//!
//! ```text
//! terminate(process, timeout, force)
//!   ├─ already exited?            ──► kill_leftovers() ─► AlreadyExited
//!   ├─ request_shutdown()         (SIGTERM / WM_CLOSE; failure is logged, not fatal)
//!   ├─ wait_timeout(timeout)      ──► Graceful
//!   ├─ !force                     ──► Err(TerminationTimeout)
//!   ├─ force_kill()               (descendants children-first, then the root)
//!   └─ wait_timeout(grace)        ──► Forced { signalled } | Err(TerminationFailure)
//! ```
//!
//! ## Fallback
//! ```text
//!   grouping engine ──attach fails──► manual_only = true (never reset)
//!        ▲                                   │
//!        └── only while manual_only=false    └─► every later attach: ManuallyTracked
//! ```
//! Entries that were group-attached before the switch keep the grouping
//! terminator; the switch only affects later attachments.

mod tree;

#[cfg(windows)]
mod job;
#[cfg(unix)]
mod group;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::Child;

use crate::core::TerminationMode;
use crate::error::GuardError;
use crate::process::{AttachmentState, ManagedProcess};

#[cfg(unix)]
pub use group::ProcessGroupEngine;
#[cfg(windows)]
pub use job::JobObjectEngine;
pub use tree::TreeWalkEngine;

/// One native termination mechanism.
///
/// Methods are synchronous: they only issue native calls and never wait for
/// the process, so they are usable from `Drop`.
pub trait Terminator: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Binds a freshly spawned process to this mechanism.
    ///
    /// Called once per process, before the exit watcher takes the child.
    fn attach(&self, process: &ManagedProcess, child: &Child) -> Result<AttachmentState, GuardError>;

    /// Sends the cooperative stop request.
    fn request_shutdown(&self, process: &ManagedProcess) -> Result<(), GuardError>;

    /// Forcibly terminates the process and its descendants.
    ///
    /// Returns the number of pids that were actually signalled.
    fn force_kill(&self, process: &ManagedProcess) -> Result<usize, GuardError>;

    /// Runs on the exit watcher right after `process` was reaped, before its
    /// exit is visible to anyone else.
    fn observe_exit(&self, _process: &ManagedProcess) {}

    /// Kills what an already-exited process left behind (members of its group).
    ///
    /// Must only reach processes recorded by [`observe_exit`](Self::observe_exit):
    /// the pid of a reaped process can belong to a stranger by now.
    ///
    /// Returns the number of pids or groups signalled.
    fn kill_leftovers(&self, _process: &ManagedProcess) -> Result<usize, GuardError> {
        Ok(0)
    }

    /// Releases guardian-lifetime native resources. Called once, at disposal.
    fn release(&self) -> Result<(), GuardError> {
        Ok(())
    }
}

/// How a termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had exited before termination started.
    AlreadyExited,
    /// The process exited within the cooperative timeout.
    Graceful,
    /// The forced phase was needed.
    Forced {
        /// Pids that received a forced termination.
        signalled: usize,
    },
}

impl Termination {
    pub fn is_forced(&self) -> bool {
        matches!(self, Termination::Forced { .. })
    }
}

/// Result of attaching one process.
#[derive(Debug)]
pub(crate) struct Attached {
    pub state: AttachmentState,
    /// Why the process is manually tracked, when it is.
    pub reason: Option<Cow<'static, str>>,
    /// True for the attach that switched the engine to manual tracking.
    pub switched: bool,
}

/// Grouping + manual terminators with the sticky fallback flag.
pub(crate) struct Engine {
    grouping: Option<Arc<dyn Terminator>>,
    manual: Arc<dyn Terminator>,
    manual_only: AtomicBool,
    forced_exit_grace: Duration,
}

impl Engine {
    /// Selects terminators for `mode`. `custom` replaces the platform grouping engine.
    pub(crate) fn for_mode(
        mode: TerminationMode,
        custom: Option<Arc<dyn Terminator>>,
        forced_exit_grace: Duration,
    ) -> Self {
        let grouping = match (mode, custom) {
            (TerminationMode::TreeWalk, _) => None,
            (TerminationMode::Auto, Some(custom)) => Some(custom),
            (TerminationMode::Auto, None) => match platform_grouping() {
                Ok(grouping) => grouping,
                Err(e) => {
                    tracing::warn!(error = %e, "grouping engine unavailable, using manual tracking");
                    None
                }
            },
        };
        Self::new(grouping, Arc::new(TreeWalkEngine::new()), forced_exit_grace)
    }

    pub(crate) fn new(
        grouping: Option<Arc<dyn Terminator>>,
        manual: Arc<dyn Terminator>,
        forced_exit_grace: Duration,
    ) -> Self {
        Self {
            manual_only: AtomicBool::new(grouping.is_none()),
            grouping,
            manual,
            forced_exit_grace,
        }
    }

    /// True once every new process is manually tracked.
    pub(crate) fn is_manual_only(&self) -> bool {
        self.manual_only.load(Ordering::Acquire)
    }

    /// Name of the terminator new processes attach to.
    pub(crate) fn active_name(&self) -> &'static str {
        match &self.grouping {
            Some(g) if !self.is_manual_only() => g.name(),
            _ => self.manual.name(),
        }
    }

    /// Attaches `process`, falling back to manual tracking for good on failure.
    pub(crate) fn attach(&self, process: &ManagedProcess, child: &Child) -> Attached {
        let pid = process.pid();

        let grouping = match &self.grouping {
            Some(g) if !self.is_manual_only() => g,
            Some(_) => {
                let reason = Cow::Borrowed("grouping engine disabled after an attach failure");
                return self.attach_manual(process, child, reason, false);
            }
            None => {
                let reason = Cow::Borrowed("grouping engine not in use");
                return self.attach_manual(process, child, reason, false);
            }
        };

        match grouping.attach(process, child) {
            Ok(state) => {
                process.mark_attached(state);
                tracing::debug!(pid, engine = grouping.name(), state = ?state, "process attached");
                Attached {
                    state,
                    reason: None,
                    switched: false,
                }
            }
            Err(e) => {
                let switched = !self.manual_only.swap(true, Ordering::AcqRel);
                if switched {
                    tracing::warn!(
                        pid,
                        engine = grouping.name(),
                        error = %e,
                        "attach failed, switching to manual tracking for all later processes"
                    );
                }
                self.attach_manual(process, child, Cow::Owned(e.to_string()), switched)
            }
        }
    }

    fn attach_manual(
        &self,
        process: &ManagedProcess,
        child: &Child,
        reason: Cow<'static, str>,
        switched: bool,
    ) -> Attached {
        let state = self
            .manual
            .attach(process, child)
            .unwrap_or(AttachmentState::ManuallyTracked);
        process.mark_attached(state);
        Attached {
            state,
            reason: Some(reason),
            switched,
        }
    }

    /// Terminator that handles `process`, for its exit watcher.
    pub(crate) fn exit_hook(&self, process: &ManagedProcess) -> Arc<dyn Terminator> {
        Arc::clone(self.terminator_for(process))
    }

    fn terminator_for(&self, process: &ManagedProcess) -> &Arc<dyn Terminator> {
        match (&self.grouping, process.attachment()) {
            (Some(g), AttachmentState::GroupAttached) => g,
            _ => &self.manual,
        }
    }

    /// Runs the two-phase protocol against one process.
    pub(crate) async fn terminate(
        &self,
        process: &ManagedProcess,
        timeout: Duration,
        force: bool,
    ) -> Result<Termination, GuardError> {
        let pid = process.pid();
        let terminator = self.terminator_for(process);

        if process.has_exited() {
            match terminator.kill_leftovers(process) {
                Ok(0) => {}
                Ok(n) => tracing::debug!(pid, signalled = n, "killed leftovers of exited process"),
                Err(e) => tracing::warn!(pid, error = %e, "failed to kill leftovers"),
            }
            return Ok(Termination::AlreadyExited);
        }

        let cooperative = terminator.request_shutdown(process);
        if let Err(e) = &cooperative {
            tracing::warn!(pid, engine = terminator.name(), error = %e, "cooperative request failed");
        }
        if process.wait_timeout(timeout).await {
            return Ok(Termination::Graceful);
        }

        if !force {
            return match cooperative {
                Err(e) => Err(e),
                Ok(()) => Err(GuardError::TerminationTimeout { pid, timeout }),
            };
        }

        tracing::debug!(pid, engine = terminator.name(), ?timeout, "cooperative phase expired, forcing");
        let signalled = match terminator.force_kill(process) {
            Ok(n) => n,
            Err(e) if !process.has_exited() => return Err(e),
            Err(_) => 0,
        };

        if process.wait_timeout(self.forced_exit_grace).await {
            Ok(Termination::Forced { signalled })
        } else {
            Err(GuardError::termination(
                pid,
                format!(
                    "still running {:?} after forced termination",
                    self.forced_exit_grace
                ),
            ))
        }
    }

    /// Forced termination without waiting, for the drop path.
    pub(crate) fn force_now(&self, process: &ManagedProcess) {
        if process.has_exited() {
            return;
        }
        let terminator = self.terminator_for(process);
        if let Err(e) = terminator.force_kill(process) {
            tracing::error!(pid = process.pid(), engine = terminator.name(), error = %e, "forced termination failed");
        }
    }

    /// Releases the grouping engine's native resources.
    pub(crate) fn release(&self) -> Result<(), GuardError> {
        match &self.grouping {
            Some(g) => g.release(),
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
fn platform_grouping() -> Result<Option<Arc<dyn Terminator>>, GuardError> {
    Ok(Some(Arc::new(ProcessGroupEngine::new())))
}

#[cfg(windows)]
fn platform_grouping() -> Result<Option<Arc<dyn Terminator>>, GuardError> {
    Ok(Some(Arc::new(JobObjectEngine::new()?)))
}

#[cfg(not(any(unix, windows)))]
fn platform_grouping() -> Result<Option<Arc<dyn Terminator>>, GuardError> {
    Ok(None)
}
