//! Native capability adapter.
//!
//! Thin access to the platform primitives the termination engines build on:
//!
//! - [`ProcessTable`]: live process ids with their parent ids (descendant walks)
//! - [`resident_bytes`]: resident memory of one process (statistics)
//! - `unix`: signals to a pid or a process group, group membership
//! - `windows`: kill-on-close job object, `TerminateProcess`, `WM_CLOSE`
//!
//! Every native handle acquired here is owned by a guard that closes it on all
//! paths; only the job object outlives a single call.

mod table;

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(windows)]
pub(crate) mod windows;

pub use table::{ProcessTable, resident_bytes};
