//! Windows job-object engine.
//!
//! One anonymous job with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE` lives as long as
//! the guardian. Every child is assigned to it right after spawn, so when the
//! last handle closes (disposal, or the kernel tearing down a crashed host)
//! every member dies with it.

use std::sync::{PoisonError, RwLock};

use tokio::process::Child;

use crate::engine::Terminator;
use crate::engine::tree::{force_one, signal_tree};
use crate::error::GuardError;
use crate::native::windows::{JobObject, close_main_windows};
use crate::process::{AttachmentState, ManagedProcess};

/// Assigns children to a kill-on-close job object.
#[derive(Debug)]
pub struct JobObjectEngine {
    job: RwLock<Option<JobObject>>,
}

impl JobObjectEngine {
    /// Creates the job object.
    pub fn new() -> Result<Self, GuardError> {
        let job = JobObject::create_kill_on_close().map_err(|e| GuardError::attach(0, e))?;
        tracing::debug!("kill-on-close job object created");
        Ok(Self {
            job: RwLock::new(Some(job)),
        })
    }
}

impl Terminator for JobObjectEngine {
    fn name(&self) -> &'static str {
        "job-object"
    }

    fn attach(&self, process: &ManagedProcess, child: &Child) -> Result<AttachmentState, GuardError> {
        let pid = process.pid();
        let guard = self.job.read().unwrap_or_else(PoisonError::into_inner);
        let job = guard
            .as_ref()
            .ok_or_else(|| GuardError::attach(pid, "job object already closed"))?;
        let handle = child
            .raw_handle()
            .ok_or_else(|| GuardError::attach(pid, "process handle already released"))?;
        job.assign(handle).map_err(|e| GuardError::attach(pid, e))?;
        Ok(AttachmentState::GroupAttached)
    }

    fn request_shutdown(&self, process: &ManagedProcess) -> Result<(), GuardError> {
        let windows = close_main_windows(process.pid());
        tracing::debug!(pid = process.pid(), windows, "posted WM_CLOSE");
        Ok(())
    }

    fn force_kill(&self, process: &ManagedProcess) -> Result<usize, GuardError> {
        signal_tree(process.pid(), force_one)
    }

    fn release(&self) -> Result<(), GuardError> {
        let job = self
            .job
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match job {
            Some(job) => job.close().map_err(|e| GuardError::termination(0, e)),
            None => Ok(()),
        }
    }
}
