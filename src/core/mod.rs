//! Guardian core: registry, lifecycle and teardown.
//!
//! The public API from this module is [`Guardian`], built through
//! [`GuardianBuilder`] from a [`GuardianConfig`].
//!
//! Internal modules:
//! - [`guardian`]: start/kill/remove/dispose, event listener, drop safety net;
//! - [`registry`]: concurrent pid → process map;
//! - [`cleanup`]: periodic eviction of exited entries;
//! - [`stats`]: registry statistics;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`config`]: configuration and engine selection.

mod builder;
mod cleanup;
mod config;
mod guardian;
mod registry;
mod shutdown;
mod stats;

pub use builder::GuardianBuilder;
pub use config::{GuardianConfig, TerminationMode};
pub use guardian::Guardian;
pub use shutdown::wait_for_shutdown_signal;
pub use stats::Statistics;
