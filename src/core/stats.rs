//! Point-in-time statistics over the registry.

use std::time::{Duration, SystemTime};

use crate::process::ProcessRef;

/// Aggregate view of the managed processes, computed from one registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Registered entries.
    pub total: usize,
    /// Entries whose process is still running.
    pub running: usize,
    /// Entries whose process has exited but which are still registered.
    pub exited: usize,
    /// Sum of resident memory over running processes that report it.
    pub memory_bytes: u64,
    /// Mean runtime over all entries (zero when empty).
    pub average_runtime: Duration,
    /// When the snapshot was taken.
    pub captured_at: SystemTime,
}

impl Statistics {
    pub(crate) fn from_snapshot(processes: &[ProcessRef]) -> Self {
        let mut running = 0;
        let mut memory_bytes = 0u64;
        let mut total_runtime = Duration::ZERO;

        for p in processes {
            if !p.has_exited() {
                running += 1;
                memory_bytes = memory_bytes.saturating_add(p.memory_usage().unwrap_or(0));
            }
            total_runtime = total_runtime.saturating_add(p.runtime());
        }

        let total = processes.len();
        let average_runtime = match u32::try_from(total) {
            Ok(0) => Duration::ZERO,
            Ok(n) => total_runtime / n,
            Err(_) => Duration::from_secs_f64(total_runtime.as_secs_f64() / total as f64),
        };

        Self {
            total,
            running,
            exited: total - running,
            memory_bytes,
            average_runtime,
            captured_at: SystemTime::now(),
        }
    }
}
