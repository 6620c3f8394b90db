//! # LogWriter: renders guardian events through `tracing`
//!
//! Registered automatically when `GuardianConfig::detailed_logging` is set.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! DEBUG procguard::events: [started] pid=4242 program="sleep" attachment=GroupAttached
//! DEBUG procguard::events: [exited] pid=4242 program="sleep" exit_code=Some(0)
//!  WARN procguard::events: [forced] pid=4243 program="sh" timeout_ms=Some(5000) killed=Some(2)
//! ERROR procguard::events: [failed] op="kill_all" pid=Some(4244) err="..."
//!  INFO procguard::events: [cleanup-completed] succeeded=2 failed=0 elapsed_ms=104
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let pid = e.pid.unwrap_or_default();
        let program = e.program.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::Started => {
                debug!(target: "procguard::events", "[started] pid={pid} program={program:?} attachment={:?}", e.attachment);
            }
            EventKind::GroupAttached => {
                debug!(target: "procguard::events", "[group-attached] pid={pid} program={program:?}");
            }
            EventKind::ManualTrackingActivated => {
                info!(target: "procguard::events", "[manual-tracking] pid={pid} program={program:?} reason={:?}", e.reason);
            }
            EventKind::Exited => {
                debug!(target: "procguard::events", "[exited] pid={pid} program={program:?} exit_code={:?}", e.exit_code);
            }
            EventKind::Removed => {
                debug!(target: "procguard::events", "[removed] pid={pid} program={program:?} reason={:?}", e.reason);
            }
            EventKind::ForcedTerminated => {
                warn!(target: "procguard::events", "[forced] pid={pid} program={program:?} timeout_ms={:?} killed={:?}", e.timeout_ms, e.killed);
            }
            EventKind::OperationFailed => {
                error!(target: "procguard::events", "[failed] op={:?} pid={:?} err={:?}", e.operation.unwrap_or("unknown"), e.pid, e.error);
            }
            EventKind::CleanupCompleted => {
                info!(
                    target: "procguard::events",
                    "[cleanup-completed] succeeded={} failed={} elapsed_ms={}",
                    e.succeeded.unwrap_or_default(),
                    e.failed.unwrap_or_default(),
                    e.elapsed_ms.unwrap_or_default()
                );
            }
            EventKind::ShutdownRequested => {
                info!(target: "procguard::events", "[shutdown-requested]");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "procguard::events", "[subscriber-overflow] {:?}", e.reason);
            }
            EventKind::SubscriberPanicked => {
                warn!(
                    target: "procguard::events",
                    "[subscriber-panicked] subscriber={} info={}",
                    e.operation.unwrap_or("unknown"),
                    e.error.as_deref().unwrap_or("unknown"),
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
