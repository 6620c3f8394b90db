//! Unix process-group engine.
//!
//! The default spawner makes every child the leader of a fresh process group
//! (`pgid == pid`). Signals then go to the whole group, which reaches
//! grandchildren even after their parent has exited. The forced phase also
//! walks descendants, for members that moved to a group of their own.
//!
//! ## Leftovers
//! When the leader is reaped, the members still in its group are recorded.
//! A group id stays reserved while any member lives, so as long as one recorded
//! member is still in the group, the id cannot have been handed to a stranger
//! and the group is safe to kill. Without such a member nothing is signalled.

use tokio::process::Child;

use crate::engine::Terminator;
use crate::engine::tree::{force_one, signal_tree};
use crate::error::GuardError;
use crate::native::unix::{SIGKILL, SIGTERM, group_members, group_of, signal_group};
use crate::process::{AttachmentState, ManagedProcess};

/// Signals the process group led by each managed process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupEngine;

impl ProcessGroupEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Terminator for ProcessGroupEngine {
    fn name(&self) -> &'static str {
        "process-group"
    }

    fn attach(&self, process: &ManagedProcess, _child: &Child) -> Result<AttachmentState, GuardError> {
        let pid = process.pid();
        match group_of(pid) {
            Ok(Some(pgid)) if pgid == pid => Ok(AttachmentState::GroupAttached),
            Ok(Some(pgid)) => Err(GuardError::attach(
                pid,
                format!("not a process-group leader (pgid={pgid})"),
            )),
            // Already reaped: nothing left to group.
            Ok(None) => Ok(AttachmentState::GroupAttached),
            Err(e) => Err(GuardError::attach(pid, e)),
        }
    }

    fn request_shutdown(&self, process: &ManagedProcess) -> Result<(), GuardError> {
        let pid = process.pid();
        signal_group(pid, SIGTERM)
            .map(|_| ())
            .map_err(|e| GuardError::termination(pid, e))
    }

    fn force_kill(&self, process: &ManagedProcess) -> Result<usize, GuardError> {
        let pid = process.pid();
        let mut signalled = signal_tree(pid, force_one)?;
        match signal_group(pid, SIGKILL) {
            Ok(true) => signalled += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(pid, error = %e, "failed to kill process group"),
        }
        Ok(signalled)
    }

    fn observe_exit(&self, process: &ManagedProcess) {
        let pid = process.pid();
        match group_members(pid) {
            Ok(members) if members.is_empty() => {}
            Ok(members) => {
                tracing::debug!(pid, survivors = ?members, "process group outlived its leader");
                process.record_survivors(members);
            }
            Err(e) => tracing::warn!(pid, error = %e, "failed to list process group members"),
        }
    }

    fn kill_leftovers(&self, process: &ManagedProcess) -> Result<usize, GuardError> {
        let pid = process.pid();
        let still_ours = process
            .survivors()
            .iter()
            .any(|&member| matches!(group_of(member), Ok(Some(pgid)) if pgid == pid));
        if !still_ours {
            return Ok(0);
        }
        signal_group(pid, SIGKILL)
            .map(usize::from)
            .map_err(|e| GuardError::termination(pid, e))
    }
}
