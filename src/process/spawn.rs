//! # Spawn capability.
//!
//! The guardian does not create processes itself: it calls a [`Spawn`]
//! implementation and supervises whatever live [`Child`] comes back.
//!
//! - [`CommandSpawner`] is the default: a `tokio::process::Command` built from the
//!   [`SpawnSpec`], placed in its own process group on Unix.
//! - Any `Fn(&SpawnSpec) -> io::Result<Child>` closure is a spawner too, which is
//!   the easy way to wire stdio or extra platform flags.
//!
//! ## Process groups
//! On Unix the child calls `setpgid(0, 0)` before `exec`, which makes it the leader
//! of a new process group. The group engine signals the whole group at once; if a
//! custom spawner skips this, attachment fails and the guardian falls back to
//! manual tracking.

use std::io;

use tokio::process::{Child, Command};

use super::SpawnSpec;

/// Capability that creates a process from a [`SpawnSpec`].
pub trait Spawn: Send + Sync + 'static {
    /// Starts the process and returns its live handle.
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<Child>;
}

impl<F> Spawn for F
where
    F: Fn(&SpawnSpec) -> io::Result<Child> + Send + Sync + 'static,
{
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<Child> {
        self(spec)
    }
}

/// Default spawner over `tokio::process::Command`.
#[derive(Clone, Debug)]
pub struct CommandSpawner {
    new_process_group: bool,
}

impl Default for CommandSpawner {
    fn default() -> Self {
        Self {
            new_process_group: true,
        }
    }
}

impl CommandSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controls whether Unix children lead their own process group (default: true).
    ///
    /// Has no effect on other platforms.
    pub fn with_process_group(mut self, enabled: bool) -> Self {
        self.new_process_group = enabled;
        self
    }

    /// Builds the command without spawning it.
    pub fn command(&self, spec: &SpawnSpec) -> Command {
        let mut command = Command::new(spec.program());
        command.args(spec.get_args());
        command.envs(spec.get_env());
        if let Some(dir) = spec.get_current_dir() {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        if self.new_process_group {
            command.process_group(0);
        }

        command
    }
}

impl Spawn for CommandSpawner {
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<Child> {
        tracing::debug!(program = spec.program(), args = ?spec.get_args(), "spawning process");
        self.command(spec).spawn()
    }
}
