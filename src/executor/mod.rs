//! Uniform command execution on the operator's host or a remote node.
//!
//! Callers issue `(program, args)` pairs through the [`Executor`] trait and
//! never learn whether the command ran locally or over SSH. Both variants run
//! every command under `sudo`, forward `PATH`, inject the configured proxy as
//! `https_proxy` and log the scrubbed command line. Captured stderr is
//! scrubbed before it is stored or reported.

mod factory;
mod local;
mod remote;
mod render;

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use camino::Utf8Path;
use thiserror::Error;

use crate::scrub::scrub_command;
use crate::ssh::SshError;

pub use factory::{executor_for, executor_for_host, is_loopback};
pub use local::LocalExecutor;
pub use remote::RemoteExecutor;
pub use render::{Invocation, PATH_ASSIGNMENT, quote_command, render_command};

/// Boxed future returned by [`Executor`] methods.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ExecutorError>> + Send + 'a>>;

/// Identifies which executor variant is in use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutorKind {
    /// Commands run on the operator's machine.
    Local,
    /// Commands run on a remote node over SSH.
    Remote,
}

/// Errors raised while running a command.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Raised when the command could not be started.
    #[error("failed to start `{command}`: {message}")]
    Spawn {
        /// Scrubbed command line.
        command: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the command ran and exited unsuccessfully.
    #[error("`{command}` exited with {}: {}", describe_exit(.exit_code.as_ref()), .stderr.trim())]
    Failed {
        /// Scrubbed command line.
        command: String,
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error, scrubbed of credentials.
        stderr: String,
    },
    /// Raised when the SSH transport fails.
    #[error("ssh transport to {host} failed: {source}")]
    Transport {
        /// Remote host address.
        host: String,
        /// Underlying transport error.
        #[source]
        source: SshError,
    },
    /// Raised when the node configuration cannot produce an executor.
    #[error("invalid node credentials: {message}")]
    Credentials {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a blocking transport task panics or is cancelled.
    #[error("executor task failed: {message}")]
    Task {
        /// Human-readable error message.
        message: String,
    },
}

impl ExecutorError {
    /// Exit code of the failed command, when one was reported.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Standard error captured from the failed command.
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Returns `true` when the command ran and exited with `code`.
    #[must_use]
    pub const fn exited_with(&self, code: i32) -> bool {
        matches!(self, Self::Failed { exit_code: Some(actual), .. } if *actual == code)
    }
}

fn describe_exit(code: Option<&i32>) -> String {
    code.map_or_else(
        || String::from("no exit status"),
        |status| format!("status {status}"),
    )
}

/// Runs commands with elevated privileges on one target host.
pub trait Executor: Send + Sync {
    /// Reports which variant this executor is.
    fn kind(&self) -> ExecutorKind;

    /// Host the executor targets, for logs and reports.
    fn target(&self) -> &str;

    /// Runs a command and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Failed`] for a non-zero exit, carrying the
    /// exit code and stderr, or a spawn or transport error when the command
    /// never ran.
    fn run_with_stdout<'a>(&'a self, program: &'a str, args: &'a [&'a str])
    -> ExecFuture<'a, String>;

    /// Copies a local file to `remote_path` on the target with `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] when the copy fails; a partially written
    /// destination is removed first.
    fn stage_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, ()>;

    /// Standard error of the most recent command run by this executor.
    fn last_stderr(&self) -> String;

    /// Runs a command, discarding its output.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::run_with_stdout`].
    fn run<'a>(&'a self, program: &'a str, args: &'a [&'a str]) -> ExecFuture<'a, ()> {
        Box::pin(async move { self.run_with_stdout(program, args).await.map(drop) })
    }
}

/// Decodes captured stderr and masks any credentials it echoes.
pub(crate) fn scrubbed_stderr(raw: &[u8]) -> String {
    scrub_command(&String::from_utf8_lossy(raw))
}

/// Per-executor slot holding the stderr of the last command.
#[derive(Debug, Default)]
pub(crate) struct StderrSlot(Mutex<String>);

impl StderrSlot {
    pub(crate) fn store(&self, stderr: &str) {
        if let Ok(mut slot) = self.0.lock() {
            stderr.clone_into(&mut slot);
        }
    }

    pub(crate) fn load(&self) -> String {
        self.0.lock().map(|slot| slot.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests;
