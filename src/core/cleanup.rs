//! # Cleanup scheduler: periodic eviction of exited entries.
//!
//! ```text
//! CleanupScheduler::start(registry, bus, period)
//!   └─► task: interval(period), first tick after one period
//!         loop {
//!           select! {
//!             token.cancelled() ─► exit
//!             tick              ─► sweep(registry, bus)
//!           }
//!         }
//!
//! sweep:
//!   registry.remove_exited() ─► for each: release() ─► publish Removed{reason="exited"}
//! ```
//!
//! ## Rules
//! - `stop()` cancels and awaits the task: no sweep runs after it returns.
//! - One entry never aborts a sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::registry::Registry;
use crate::events::{Bus, Event, EventKind};

/// Handle to the background sweep task.
pub(crate) struct CleanupScheduler {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl CleanupScheduler {
    /// Spawns the sweep loop.
    pub(crate) fn start(registry: Arc<Registry>, bus: Bus, period: Duration) -> Self {
        let token = CancellationToken::new();
        let stop = token.clone();

        let join = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep(&registry, &bus);
                        if removed > 0 {
                            tracing::debug!(removed, "cleanup sweep evicted exited processes");
                        }
                    }
                }
            }
        });

        tracing::debug!(?period, "cleanup scheduler started");
        Self { token, join }
    }

    /// Cancels the loop and waits for it to finish.
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "cleanup task ended abnormally");
        }
    }

    /// Cancels the loop without waiting (drop path).
    pub(crate) fn abort(&self) {
        self.token.cancel();
        self.join.abort();
    }
}

/// Evicts every exited entry. Returns how many were removed.
pub(crate) fn sweep(registry: &Registry, bus: &Bus) -> usize {
    let removed = registry.remove_exited();
    for process in &removed {
        process.release();
        bus.publish(
            Event::new(EventKind::Removed)
                .with_process(process)
                .with_reason("exited"),
        );
    }
    removed.len()
}
