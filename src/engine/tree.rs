//! Manual tracking: per-pid requests and descendant walks.
//!
//! Works on every platform and needs nothing from the spawner. It is also
//! the engine every other one falls back to.

use std::io;

use tokio::process::Child;

use crate::engine::Terminator;
use crate::error::GuardError;
use crate::native::ProcessTable;
use crate::process::{AttachmentState, ManagedProcess};

/// Terminates a process by walking its descendants and signalling each pid.
///
/// Both phases reach the whole tree: the cooperative request goes to every
/// descendant too, so a root that exits promptly cannot strand its children.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeWalkEngine;

impl TreeWalkEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Terminator for TreeWalkEngine {
    fn name(&self) -> &'static str {
        "tree-walk"
    }

    fn attach(&self, _process: &ManagedProcess, _child: &Child) -> Result<AttachmentState, GuardError> {
        Ok(AttachmentState::ManuallyTracked)
    }

    fn request_shutdown(&self, process: &ManagedProcess) -> Result<(), GuardError> {
        // Descendants first: a root that exits early must not strand them.
        signal_tree(process.pid(), request_one).map(|_| ())
    }

    fn force_kill(&self, process: &ManagedProcess) -> Result<usize, GuardError> {
        signal_tree(process.pid(), force_one)
    }
}

/// Applies `signal_one` to every descendant of `root` (children first), then `root`.
///
/// Descendant failures are logged; only a failure on `root` is returned.
/// Returns the number of pids that were signalled.
pub(crate) fn signal_tree<F>(root: u32, signal_one: F) -> Result<usize, GuardError>
where
    F: Fn(u32) -> io::Result<bool>,
{
    let descendants = match ProcessTable::capture() {
        Ok(table) => table.descendants(root),
        Err(e) => {
            tracing::warn!(pid = root, error = %e, "process table unavailable, signalling root only");
            Vec::new()
        }
    };

    let mut signalled = 0;
    for pid in descendants {
        match signal_one(pid) {
            Ok(true) => signalled += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(pid, root, error = %e, "failed to signal descendant"),
        }
    }

    match signal_one(root) {
        Ok(true) => signalled += 1,
        Ok(false) => {}
        Err(e) => return Err(GuardError::termination(root, e)),
    }
    Ok(signalled)
}

#[cfg(unix)]
fn request_one(pid: u32) -> io::Result<bool> {
    crate::native::unix::signal_process(pid, crate::native::unix::SIGTERM)
}

#[cfg(windows)]
fn request_one(pid: u32) -> io::Result<bool> {
    let windows = crate::native::windows::close_main_windows(pid);
    tracing::debug!(pid, windows, "posted WM_CLOSE");
    Ok(windows > 0)
}

#[cfg(not(any(unix, windows)))]
fn request_one(_pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "cooperative termination not supported",
    ))
}

#[cfg(unix)]
pub(crate) fn force_one(pid: u32) -> io::Result<bool> {
    crate::native::unix::signal_process(pid, crate::native::unix::SIGKILL)
}

#[cfg(windows)]
pub(crate) fn force_one(pid: u32) -> io::Result<bool> {
    crate::native::windows::terminate_pid(pid)
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn force_one(_pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "forced termination not supported",
    ))
}
