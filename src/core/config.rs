//! # Guardian configuration.
//!
//! Provides [`GuardianConfig`], the centralized settings for one
//! [`Guardian`](crate::Guardian), passed to [`Guardian::builder`](crate::Guardian::builder).
//!
//! ## Sentinel values
//! - `process_kill_timeout = 0s` → skip the cooperative wait (force immediately if allowed)
//! - `forced_exit_grace = 0s` → do not wait for the exit after forced termination
//! - `auto_cleanup = false` → no cleanup scheduler; `cleanup_interval` is ignored

use std::time::Duration;

use crate::error::GuardError;

/// Which termination engine new processes attach to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminationMode {
    /// Platform grouping engine (job object on Windows, process groups on Unix),
    /// falling back to tree walks if it fails.
    #[default]
    Auto,
    /// Manual tracking only: descendant walks and per-pid signals.
    TreeWalk,
}

/// Configuration for a guardian.
///
/// Defines:
/// - **Capacity**: how many processes may be registered (and started concurrently)
/// - **Termination**: cooperative timeout, forced phase, post-kill grace
/// - **Cleanup**: background eviction of exited entries
/// - **Event system**: bus capacity, built-in log subscriber
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks across the codebase, and call [`validate`](Self::validate)
/// (the builder does) before use.
#[derive(Clone, Debug)]
pub struct GuardianConfig {
    /// Registry capacity and size of the capacity gate. Must be > 0.
    pub max_managed_processes: usize,

    /// Bound on the cooperative phase of a termination.
    pub process_kill_timeout: Duration,

    /// Escalate to forced termination when the cooperative phase expires.
    ///
    /// When false, a process that ignores the cooperative request is reported as
    /// `TerminationTimeout` and left running.
    pub force_kill_on_timeout: bool,

    /// How long to wait for the exit to be observed after forced termination.
    pub forced_exit_grace: Duration,

    /// Run the cleanup scheduler.
    pub auto_cleanup: bool,

    /// Cleanup scheduler period. Must be > 0 when `auto_cleanup` is set.
    pub cleanup_interval: Duration,

    /// Return non-fatal operation errors to the caller in addition to publishing them.
    pub propagate_operation_errors: bool,

    /// Register the built-in [`LogWriter`](crate::LogWriter) subscriber.
    pub detailed_logging: bool,

    /// Engine selection.
    pub termination_mode: TerminationMode,

    /// Capacity of the event bus ring buffer (min 1; clamped by Bus).
    ///
    /// Receivers lagging more than `bus_capacity` events skip the oldest ones.
    pub bus_capacity: usize,
}

impl GuardianConfig {
    /// Checks field combinations, returning [`GuardError::InvalidConfig`] for the first bad one.
    ///
    /// # Example
    /// ```
    /// use procguard::GuardianConfig;
    ///
    /// let mut cfg = GuardianConfig::default();
    /// assert!(cfg.validate().is_ok());
    ///
    /// cfg.max_managed_processes = 0;
    /// assert_eq!(cfg.validate().unwrap_err().as_label(), "invalid_config");
    /// ```
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.max_managed_processes == 0 {
            return Err(invalid("max_managed_processes must be greater than zero"));
        }
        if self.max_managed_processes > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(invalid("max_managed_processes exceeds the semaphore permit limit"));
        }
        if self.auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup_interval must be non-zero when auto_cleanup is enabled"));
        }
        Ok(())
    }

    /// Returns the cleanup period, or `None` when the scheduler is disabled.
    #[inline]
    pub fn cleanup_period(&self) -> Option<Duration> {
        if self.auto_cleanup && !self.cleanup_interval.is_zero() {
            Some(self.cleanup_interval)
        } else {
            None
        }
    }

    /// Returns `timeout` or the configured cooperative bound.
    #[inline]
    pub fn kill_timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.process_kill_timeout)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for GuardianConfig {
    /// Default configuration:
    ///
    /// - `max_managed_processes = 100`
    /// - `process_kill_timeout = 5s`, `force_kill_on_timeout = true`, `forced_exit_grace = 5s`
    /// - `auto_cleanup = true` every `30s`
    /// - `propagate_operation_errors = false`, `detailed_logging = false`
    /// - `termination_mode = Auto`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_managed_processes: 100,
            process_kill_timeout: Duration::from_secs(5),
            force_kill_on_timeout: true,
            forced_exit_grace: Duration::from_secs(5),
            auto_cleanup: true,
            cleanup_interval: Duration::from_secs(30),
            propagate_operation_errors: false,
            detailed_logging: false,
            termination_mode: TerminationMode::Auto,
            bus_capacity: 1024,
        }
    }
}

fn invalid(reason: &str) -> GuardError {
    GuardError::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GuardianConfig::default();
        assert_eq!(cfg.max_managed_processes, 100);
        assert_eq!(cfg.process_kill_timeout, Duration::from_secs(5));
        assert!(cfg.force_kill_on_timeout);
        assert_eq!(cfg.cleanup_period(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.termination_mode, TerminationMode::Auto);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_only_matters_with_cleanup() {
        let mut cfg = GuardianConfig {
            cleanup_interval: Duration::ZERO,
            ..GuardianConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.auto_cleanup = false;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cleanup_period(), None);
    }

    #[test]
    fn test_kill_timeout_fallback() {
        let cfg = GuardianConfig::default();
        assert_eq!(cfg.kill_timeout_or_default(None), Duration::from_secs(5));
        assert_eq!(
            cfg.kill_timeout_or_default(Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_bus_capacity_clamped() {
        let cfg = GuardianConfig {
            bus_capacity: 0,
            ..GuardianConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
