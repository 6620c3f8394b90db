//! Guardian events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to notifications emitted by the guardian, the exit
//! watchers, the cleanup scheduler and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Guardian` (start/kill/remove/dispose), exit watchers,
//!   `CleanupScheduler`, `SubscriberSet` workers (overflow/panic), shutdown hook.
//! - **Consumers**: the guardian listener (fans out to `SubscriberSet`) and any
//!   receiver obtained from [`Guardian::subscribe`](crate::Guardian::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
