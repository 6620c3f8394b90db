//! Managed-process data model and the spawn capability.
//!
//! - [`SpawnSpec`]: what to launch (program, args, working directory, environment overlay)
//! - [`Spawn`] / [`CommandSpawner`]: the capability that turns a spec into a live child
//! - [`ManagedProcess`]: one supervised process, shared as [`ProcessRef`]

mod managed;
mod spawn;
mod spec;

pub use managed::{AttachmentState, ExitInfo, ManagedProcess, ProcessRef};
pub use spawn::{CommandSpawner, Spawn};
pub use spec::SpawnSpec;

pub(crate) use managed::watch_exit;
