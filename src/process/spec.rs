//! # Spawn request.
//!
//! [`SpawnSpec`] describes a process to launch. It is captured into the
//! [`ManagedProcess`](crate::ManagedProcess) at registration and never changes afterwards.
//!
//! ## Example
//! ```rust
//! use procguard::SpawnSpec;
//!
//! let spec = SpawnSpec::new("sh")
//!     .args(["-c", "echo $GREETING"])
//!     .current_dir("/tmp")
//!     .env("GREETING", "hello");
//!
//! assert_eq!(spec.program(), "sh");
//! assert_eq!(spec.get_args().len(), 2);
//! assert_eq!(spec.get_env().get("GREETING").map(String::as_str), Some("hello"));
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Executable, arguments, working directory and environment overlay.
///
/// Environment entries extend (and override) the inherited environment of the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl SpawnSpec {
    /// Creates a spec for `program` (a path or a name resolved through `PATH`).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Adds or overrides one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds or overrides several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_keep_last_value() {
        let spec = SpawnSpec::new("env")
            .env("A", "1")
            .envs([("A", "2"), ("B", "3")]);
        assert_eq!(spec.get_env().len(), 2);
        assert_eq!(spec.get_env()["A"], "2");
    }

    #[test]
    fn test_args_append_in_order() {
        let spec = SpawnSpec::new("echo").arg("a").args(["b", "c"]);
        assert_eq!(spec.get_args(), ["a", "b", "c"]);
        assert!(spec.get_current_dir().is_none());
    }
}
