//! Executor that runs commands on the operator's own host.

use std::env;
use std::process::Stdio;

use camino::Utf8Path;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::render::{Invocation, render_command};
use super::{ExecFuture, Executor, ExecutorError, ExecutorKind, StderrSlot, scrubbed_stderr};
use crate::scrub::scrub_command;

const LOCAL_TARGET: &str = "localhost";

/// Runs commands through `sudo` as child processes of `pf9ctl`.
#[derive(Debug, Default)]
pub struct LocalExecutor {
    invocation: Invocation,
    sudo_password: Option<String>,
    last_stderr: StderrSlot,
}

impl LocalExecutor {
    /// Builds a local executor that exports `proxy_url` to each command.
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        Self {
            invocation: Invocation::new(proxy_url, None),
            sudo_password: None,
            last_stderr: StderrSlot::default(),
        }
    }

    /// Feeds `password` to `sudo -S` on every command.
    #[must_use]
    pub fn with_sudo_password(mut self, password: Option<&str>) -> Self {
        self.invocation = Invocation::new(self.invocation.proxy_url.as_deref(), password);
        self.sudo_password = password
            .filter(|pw| !pw.is_empty())
            .map(str::to_owned);
        self
    }

    /// Command line this executor would log for `program` and `args`.
    #[must_use]
    pub fn rendered(&self, program: &str, args: &[&str]) -> String {
        render_command(&self.invocation, program, args)
    }

    async fn spawn(&self, program: &str, args: &[&str]) -> Result<String, ExecutorError> {
        let logged = scrub_command(&self.rendered(program, args));
        debug!(host = LOCAL_TARGET, command = %logged, "running command");

        let mut command = Command::new("sudo");
        command.args(self.invocation.sudo_args());
        if let Some(path) = env::var("PATH").ok().filter(|path| !path.is_empty()) {
            command.arg(format!("PATH={path}")).env("PATH", path);
        }
        command
            .arg(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.stdin(if self.sudo_password.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn().map_err(|err| ExecutorError::Spawn {
            command: logged.clone(),
            message: err.to_string(),
        })?;

        if let (Some(password), Some(mut stdin)) = (&self.sudo_password, child.stdin.take()) {
            stdin
                .write_all(format!("{password}\n").as_bytes())
                .await
                .map_err(|err| ExecutorError::Spawn {
                    command: logged.clone(),
                    message: err.to_string(),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| ExecutorError::Spawn {
                command: logged.clone(),
                message: err.to_string(),
            })?;

        let stderr = scrubbed_stderr(&output.stderr);
        self.last_stderr.store(&stderr);
        if !output.status.success() {
            return Err(ExecutorError::Failed {
                command: logged,
                exit_code: output.status.code(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Executor for LocalExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Local
    }

    fn target(&self) -> &str {
        LOCAL_TARGET
    }

    fn run_with_stdout<'a>(
        &'a self,
        program: &'a str,
        args: &'a [&'a str],
    ) -> ExecFuture<'a, String> {
        Box::pin(self.spawn(program, args))
    }

    fn stage_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            let octal = format!("{mode:o}");
            self.run(
                "install",
                &["-m", octal.as_str(), local_path.as_str(), remote_path],
            )
            .await
        })
    }

    fn last_stderr(&self) -> String {
        self.last_stderr.load()
    }
}
