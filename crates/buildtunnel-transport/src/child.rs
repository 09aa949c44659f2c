//! Launching the build client as a child process.
//!
//! In listener mode the child is pointed at the local proxy through an
//! environment variable. It shares our stdin, stdout and stderr so an
//! interactive build behaves as if it were run directly.
//!
//! # Example
//!
//! ```no_run
//! use buildtunnel_transport::child::ChildCommand;
//!
//! # async fn example() -> Result<(), buildtunnel_transport::TransportError> {
//! let mut child = ChildCommand::new("buildctl")
//!     .args(["build", "--frontend", "dockerfile.v0"])
//!     .env("BUILDKIT_HOST", "tcp://127.0.0.1:41234")
//!     .spawn()?;
//! let status = child.wait().await?;
//! # drop(status);
//! # Ok(())
//! # }
//! ```

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::error::TransportError;

/// A program to run against the local proxy.
///
/// Arguments are kept as `OsString`s and reach the child byte for byte.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
}

impl ChildCommand {
    /// Run `program` with no arguments.
    #[must_use]
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: PathBuf::from(program.as_ref()),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Split a command line into the program and its arguments.
    ///
    /// Returns `None` for an empty command line.
    #[must_use]
    pub fn from_argv<I>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program).args(argv))
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// The program that will be run.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The arguments after the program.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Spawn the process with inherited stdio.
    ///
    /// The child is killed if the returned handle is dropped before it exits.
    pub fn spawn(self) -> Result<Child, TransportError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| TransportError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        info!(
            program = %self.program.display(),
            pid = child.id().unwrap_or_default(),
            "child process started"
        );
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_argv() {
        let argv = ["buildctl", "build", "--progress", "plain"].map(OsString::from);
        let command = ChildCommand::from_argv(argv).unwrap();

        assert_eq!(command.program(), Path::new("buildctl"));
        assert_eq!(command.arguments(), ["build", "--progress", "plain"].map(OsString::from));
        assert!(ChildCommand::from_argv(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_program() {
        let err = ChildCommand::new("nonexistent-program-12345")
            .spawn()
            .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Process);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_sees_environment() {
        let mut child = ChildCommand::new("sh")
            .args(["-c", "test \"$BUILDKIT_HOST\" = tcp://127.0.0.1:9"])
            .env("BUILDKIT_HOST", "tcp://127.0.0.1:9")
            .spawn()
            .unwrap();

        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_arguments_pass_through() {
        use std::os::unix::ffi::OsStrExt;

        let raw = OsStr::from_bytes(b"tag-\xff");
        let command = ChildCommand::new("sh")
            .args(["-c", r#"test "$1" = "$(printf 'tag-\377')""#, "sh"])
            .args([raw]);
        assert_eq!(command.arguments()[3], raw);

        let status = command.spawn().unwrap().wait().await.unwrap();
        assert!(status.success());
    }
}
