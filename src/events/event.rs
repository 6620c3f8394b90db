//! # Events emitted by the guardian.
//!
//! The [`EventKind`] enum classifies notifications across four categories:
//! - **Lifecycle events**: one managed process moved through its lifecycle
//!   (started, attached, exited, removed, force-terminated)
//! - **Error events**: a guardian operation failed for one process
//! - **Cleanup events**: a kill-all pass finished
//! - **Runtime events**: shutdown hook fired, subscriber overflow/panic
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the
//! process id and program, error text and kill-all counters.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procguard::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::OperationFailed)
//!     .with_pid(4242)
//!     .with_operation("kill")
//!     .with_error("EPERM");
//!
//! assert_eq!(ev.kind, EventKind::OperationFailed);
//! assert_eq!(ev.pid, Some(4242));
//! assert_eq!(ev.error.as_deref(), Some("EPERM"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::process::{AttachmentState, ManagedProcess};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of guardian events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Lifecycle events ===
    /// Process spawned and registered.
    ///
    /// Sets: `pid`, `program`, `attachment`
    Started,

    /// Process attached to the kill-on-close grouping mechanism.
    ///
    /// Sets: `pid`, `program`, `attachment`
    GroupAttached,

    /// Process will be terminated through descendant walks and direct signals.
    ///
    /// Sets: `pid`, `program`, `attachment`, `reason` (why grouping was not used),
    /// `operation` (`"attach"`, only on the attach that disabled grouping)
    ManualTrackingActivated,

    /// Managed process exited (observed exactly once per process).
    ///
    /// Sets: `pid`, `program`, `attachment`, `exit_code` (None when killed by a signal)
    Exited,

    /// Process left supervision without being terminated by the guardian.
    ///
    /// Sets: `pid`, `program`, `reason` (`"removed"` or `"exited"`)
    Removed,

    /// Process survived the cooperative phase and was forcibly terminated.
    ///
    /// Sets: `pid`, `program`, `timeout_ms` (cooperative bound), `killed` (pids signalled)
    ForcedTerminated,

    // === Error events ===
    /// A guardian operation failed.
    ///
    /// Sets: `operation`, `error`, optionally `pid`/`program`
    OperationFailed,

    // === Cleanup events ===
    /// A kill-all pass finished.
    ///
    /// Sets: `succeeded`, `failed`, `elapsed_ms`
    CleanupCompleted,

    // === Runtime events ===
    /// Shutdown hook observed an OS termination signal.
    ShutdownRequested,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (`"subscriber=<name> reason=<full|closed>"`), `operation` (subscriber name)
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `operation` (subscriber name), `error` (panic message)
    SubscriberPanicked,
}

/// Guardian event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Affected process id.
    pub pid: Option<u32>,
    /// Program of the affected process.
    pub program: Option<Arc<str>>,
    /// Attachment of the affected process at publish time.
    pub attachment: Option<AttachmentState>,
    /// Exit code reported by the OS.
    pub exit_code: Option<i32>,

    /// Name of the failed operation (or subscriber name for subscriber events).
    pub operation: Option<&'static str>,
    /// Error text.
    pub error: Option<Arc<str>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,

    /// Cooperative timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Number of pids signalled during a forced termination.
    pub killed: Option<u32>,
    /// Kill-all: processes terminated.
    pub succeeded: Option<u32>,
    /// Kill-all: processes that could not be terminated.
    pub failed: Option<u32>,
    /// Kill-all: elapsed time in milliseconds (compact).
    pub elapsed_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            program: None,
            attachment: None,
            exit_code: None,
            operation: None,
            error: None,
            reason: None,
            timeout_ms: None,
            killed: None,
            succeeded: None,
            failed: None,
            elapsed_ms: None,
        }
    }

    /// Attaches pid, program and current attachment of a managed process.
    #[inline]
    pub fn with_process(mut self, process: &ManagedProcess) -> Self {
        self.pid = Some(process.pid());
        self.program = Some(process.program());
        self.attachment = Some(process.attachment());
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a program name.
    #[inline]
    pub fn with_program(mut self, program: impl Into<Arc<str>>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Attaches the failed operation name.
    #[inline]
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attaches an error text.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches the number of pids signalled during forced termination.
    #[inline]
    pub fn with_killed(mut self, n: usize) -> Self {
        self.killed = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    /// Attaches kill-all counters and elapsed time.
    #[inline]
    pub fn with_cleanup(mut self, succeeded: usize, failed: usize, elapsed: Duration) -> Self {
        self.succeeded = Some(succeeded.min(u32::MAX as usize) as u32);
        self.failed = Some(failed.min(u32::MAX as usize) as u32);
        self.elapsed_ms = Some(compact_ms(elapsed));
        self
    }

    /// Creates an operation failure event.
    #[inline]
    pub fn operation_failed(operation: &'static str, error: &crate::GuardError) -> Self {
        let ev = Event::new(EventKind::OperationFailed)
            .with_operation(operation)
            .with_error(error.to_string());
        match error.pid() {
            Some(pid) => ev.with_pid(pid),
            None => ev,
        }
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_operation(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_operation(subscriber)
            .with_error(info)
    }

    /// Returns true for per-process lifecycle events.
    #[inline]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Started
                | EventKind::GroupAttached
                | EventKind::ManualTrackingActivated
                | EventKind::Exited
                | EventKind::Removed
                | EventKind::ForcedTerminated
        )
    }

    /// Returns the kill-all elapsed time, if set.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
