//! # procguard
//!
//! **procguard** bounds the lifetime of spawned child processes to the host that
//! spawned them. When the host shuts down, drops its guardian, or (with a grouping
//! engine) dies abruptly, every descendant it launched is terminated.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  SpawnSpec   │   │  SpawnSpec   │   │  SpawnSpec   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Guardian                                                         │
//! │  - Spawn (CommandSpawner or custom)                               │
//! │  - Registry (pid → ManagedProcess, dashmap)                       │
//! │  - Engine (grouping Terminator + TreeWalkEngine, sticky fallback) │
//! │  - Capacity gate (semaphore), CleanupScheduler                    │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   │
//!     │ exit watcher │   │ exit watcher │   │ exit watcher │   │
//!     │ (owns Child) │   │ (owns Child) │   │ (owns Child) │   │
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘   │
//!      │ Exited           │ Exited           │ Exited          │ Started, Removed,
//!      ▼                  ▼                  ▼                 ▼ ForcedTerminated, ...
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │              (capacity: GuardianConfig::bus_capacity)             │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                           (per-sub queues)
//!                       ┌───────────┼───────────┐
//!                       ▼           ▼           ▼
//!                   LogWriter    custom      custom
//! ```
//!
//! ### Termination
//! ```text
//! Engine::terminate(process, timeout)
//!   ├─► cooperative: SIGTERM to the group / pid  (Windows: WM_CLOSE)
//!   ├─► wait up to timeout ─────────────────────► Graceful
//!   ├─► forced (if force_kill_on_timeout):
//!   │     descendants children-first, then root  (SIGKILL / TerminateProcess)
//!   └─► wait up to forced_exit_grace ───────────► Forced | TerminationFailure
//! ```
//!
//! | Platform | Grouping engine        | Survives abrupt host death     |
//! |----------|------------------------|--------------------------------|
//! | Windows  | [`JobObjectEngine`]    | yes (kill-on-close job object) |
//! | Unix     | [`ProcessGroupEngine`] | no; disposal / drop only       |
//! | any      | [`TreeWalkEngine`]     | no; fallback for both          |
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Start, kill, remove and dispose managed processes.           | [`Guardian`], [`GuardianBuilder`]           |
//! | **Spawning**      | Describe and create processes.                               | [`SpawnSpec`], [`Spawn`], [`CommandSpawner`]|
//! | **Engines**       | Native termination mechanisms behind one trait.              | [`Terminator`], [`Termination`]             |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom).       | [`Subscribe`], [`LogWriter`]                |
//! | **Errors**        | Typed errors with stable labels.                             | [`GuardError`]                              |
//! | **Configuration** | Centralize guardian settings.                                | [`GuardianConfig`], [`TerminationMode`]     |
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procguard::{Guardian, GuardianConfig, SpawnSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = GuardianConfig {
//!         process_kill_timeout: Duration::from_secs(2),
//!         detailed_logging: true,
//!         ..GuardianConfig::default()
//!     };
//!
//!     let guardian = Guardian::builder(cfg).build()?;
//!     guardian.dispose_on_shutdown_signal()?;
//!
//!     let worker = guardian.start(SpawnSpec::new("sleep").arg("300")).await?;
//!     println!("worker {} attached as {:?}", worker.pid(), worker.attachment());
//!
//!     let stats = guardian.statistics()?;
//!     println!("{} running", stats.running);
//!
//!     guardian.dispose().await;
//!     Ok(())
//! }
//! ```
mod core;
mod engine;
mod error;
mod events;
mod process;
mod subscribers;

pub mod native;

// ---- Public re-exports ----

pub use core::{
    Guardian, GuardianBuilder, GuardianConfig, Statistics, TerminationMode,
    wait_for_shutdown_signal,
};
#[cfg(windows)]
pub use engine::JobObjectEngine;
#[cfg(unix)]
pub use engine::ProcessGroupEngine;
pub use engine::{Termination, Terminator, TreeWalkEngine};
pub use error::{GuardError, Result};
pub use events::{Bus, Event, EventKind};
pub use process::{
    AttachmentState, CommandSpawner, ExitInfo, ManagedProcess, ProcessRef, Spawn, SpawnSpec,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
