//! Error types used by the procguard guardian and its termination engines.
//!
//! [`GuardError`] covers every failure a caller can observe:
//!
//! - **Admission**: [`GuardError::CapacityExceeded`], [`GuardError::CancelledWait`].
//! - **Registration**: [`GuardError::SpawnFailure`], [`GuardError::AlreadyManaged`].
//! - **Native attachment**: [`GuardError::AttachFailure`] (always recovered by
//!   falling back to manual tracking; never returned from [`Guardian::start`](crate::Guardian::start)).
//! - **Termination**: [`GuardError::TerminationTimeout`], [`GuardError::TerminationFailure`].
//! - **Lifecycle**: [`GuardError::UseAfterDispose`].
//! - **Setup**: [`GuardError::InvalidConfig`].
//!
//! Like the event kinds, every variant has a stable snake_case label
//! ([`GuardError::as_label`]) for logs and metrics.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = GuardError> = std::result::Result<T, E>;

/// # Errors produced by the guardian.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GuardError {
    /// The registry already holds `max` processes.
    #[error("capacity exceeded: {max} processes already managed")]
    CapacityExceeded {
        /// Configured `max_managed_processes`.
        max: usize,
    },

    /// A process with this id is already registered.
    #[error("process {pid} is already managed")]
    AlreadyManaged {
        /// Colliding process id.
        pid: u32,
    },

    /// The spawn capability failed to create the process.
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailure {
        /// Program that was requested.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process could not be attached to the grouping mechanism.
    #[error("failed to attach process {pid}: {reason}")]
    AttachFailure {
        /// Process id (0 when the grouping object itself could not be created).
        pid: u32,
        /// Native error description.
        reason: String,
    },

    /// The cooperative phase expired and forced termination is disabled.
    #[error("process {pid} still running after {timeout:?}")]
    TerminationTimeout {
        /// Process id.
        pid: u32,
        /// Cooperative-phase bound that was exceeded.
        timeout: Duration,
    },

    /// A native call failed during termination, or the process survived it.
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailure {
        /// Process id.
        pid: u32,
        /// Native error description.
        reason: String,
    },

    /// The guardian has been disposed.
    #[error("guardian has been disposed")]
    UseAfterDispose,

    /// Waiting for a capacity slot was cancelled before a slot was free.
    #[error("wait for a capacity slot was cancelled")]
    CancelledWait,

    /// Configuration rejected by [`GuardianConfig::validate`](crate::GuardianConfig::validate).
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },
}

impl GuardError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procguard::GuardError;
    ///
    /// let err = GuardError::CapacityExceeded { max: 2 };
    /// assert_eq!(err.as_label(), "capacity_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            GuardError::CapacityExceeded { .. } => "capacity_exceeded",
            GuardError::AlreadyManaged { .. } => "already_managed",
            GuardError::SpawnFailure { .. } => "spawn_failure",
            GuardError::AttachFailure { .. } => "attach_failure",
            GuardError::TerminationTimeout { .. } => "termination_timeout",
            GuardError::TerminationFailure { .. } => "termination_failure",
            GuardError::UseAfterDispose => "use_after_dispose",
            GuardError::CancelledWait => "cancelled_wait",
            GuardError::InvalidConfig { .. } => "invalid_config",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            GuardError::CapacityExceeded { max } => format!("registry full: max={max}"),
            GuardError::AlreadyManaged { pid } => format!("duplicate pid={pid}"),
            GuardError::SpawnFailure { program, source } => {
                format!("spawn {program}: {source}")
            }
            GuardError::AttachFailure { pid, reason } => format!("attach pid={pid}: {reason}"),
            GuardError::TerminationTimeout { pid, timeout } => {
                format!("pid={pid} alive after {timeout:?}")
            }
            GuardError::TerminationFailure { pid, reason } => {
                format!("terminate pid={pid}: {reason}")
            }
            GuardError::UseAfterDispose => "guardian disposed".to_string(),
            GuardError::CancelledWait => "capacity wait cancelled".to_string(),
            GuardError::InvalidConfig { reason } => format!("config: {reason}"),
        }
    }

    /// Returns the process id the error refers to, if any.
    pub fn pid(&self) -> Option<u32> {
        match self {
            GuardError::AlreadyManaged { pid }
            | GuardError::TerminationTimeout { pid, .. }
            | GuardError::TerminationFailure { pid, .. } => Some(*pid),
            GuardError::AttachFailure { pid, .. } if *pid != 0 => Some(*pid),
            _ => None,
        }
    }

    pub(crate) fn termination(pid: u32, reason: impl std::fmt::Display) -> Self {
        GuardError::TerminationFailure {
            pid,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn attach(pid: u32, reason: impl std::fmt::Display) -> Self {
        GuardError::AttachFailure {
            pid,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(GuardError::UseAfterDispose.as_label(), "use_after_dispose");
        assert_eq!(GuardError::CancelledWait.as_label(), "cancelled_wait");
        assert_eq!(
            GuardError::TerminationTimeout {
                pid: 7,
                timeout: Duration::from_secs(1)
            }
            .as_label(),
            "termination_timeout"
        );
    }

    #[test]
    fn test_display() {
        let err = GuardError::CapacityExceeded { max: 2 };
        assert_eq!(
            err.to_string(),
            "capacity exceeded: 2 processes already managed"
        );

        let err = GuardError::termination(42, "EPERM");
        assert_eq!(err.to_string(), "failed to terminate process 42: EPERM");
    }

    #[test]
    fn test_pid_accessor() {
        assert_eq!(GuardError::AlreadyManaged { pid: 9 }.pid(), Some(9));
        assert_eq!(GuardError::attach(0, "no job object").pid(), None);
        assert_eq!(GuardError::attach(12, "denied").pid(), Some(12));
        assert_eq!(GuardError::UseAfterDispose.pid(), None);
    }

    #[test]
    fn test_spawn_failure_keeps_source() {
        let err = GuardError::SpawnFailure {
            program: "missing".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.as_message().starts_with("spawn missing"));
    }
}
