//! Executor that runs commands on a node over SSH.

use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use super::render::{Invocation, render_command};
use super::{ExecFuture, Executor, ExecutorError, ExecutorKind, StderrSlot};
use crate::scrub::scrub_command;
use crate::ssh::{SshClient, SshError, SshParams};

/// Runs commands on one remote host through a shared [`SshClient`].
#[derive(Debug)]
pub struct RemoteExecutor {
    host: String,
    client: Arc<Mutex<SshClient>>,
    invocation: Invocation,
    sudo_password: Option<String>,
    last_stderr: StderrSlot,
}

impl RemoteExecutor {
    /// Dials `params.host` and returns an executor bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Transport`] when the SSH session cannot be
    /// established.
    pub async fn connect(
        params: SshParams,
        proxy_url: Option<&str>,
        sudo_password: Option<&str>,
    ) -> Result<Self, ExecutorError> {
        let host = params.host.clone();
        let client = tokio::task::spawn_blocking(move || SshClient::connect(&params))
            .await
            .map_err(|err| ExecutorError::Task {
                message: err.to_string(),
            })?
            .map_err(|source| ExecutorError::Transport {
                host: host.clone(),
                source,
            })?;
        Ok(Self::from_client(client, proxy_url, sudo_password))
    }

    /// Wraps an already connected client.
    #[must_use]
    pub fn from_client(
        client: SshClient,
        proxy_url: Option<&str>,
        sudo_password: Option<&str>,
    ) -> Self {
        Self {
            host: client.host().to_owned(),
            client: Arc::new(Mutex::new(client)),
            invocation: Invocation::new(proxy_url, sudo_password),
            sudo_password: sudo_password
                .filter(|pw| !pw.is_empty())
                .map(str::to_owned),
            last_stderr: StderrSlot::default(),
        }
    }

    async fn exec(&self, program: &str, args: &[&str]) -> Result<String, ExecutorError> {
        let payload = render_command(&self.invocation, program, args);
        let logged = scrub_command(&payload);
        debug!(host = %self.host, command = %logged, "running command");

        let client = Arc::clone(&self.client);
        let stdin = self.sudo_password.as_ref().map(|pw| format!("{pw}\n"));
        let result = tokio::task::spawn_blocking(move || {
            let guard = client.lock().map_err(|err| SshError::SessionOpenFailed {
                message: err.to_string(),
            })?;
            guard.run_command(&payload, stdin.as_deref())
        })
        .await
        .map_err(|err| ExecutorError::Task {
            message: err.to_string(),
        })?;

        match result {
            Ok(output) => {
                self.last_stderr.store(&output.stderr);
                Ok(output.stdout)
            }
            Err(SshError::CommandExited { code, stderr }) => {
                self.last_stderr.store(&stderr);
                Err(ExecutorError::Failed {
                    command: logged,
                    exit_code: Some(code),
                    stderr,
                })
            }
            Err(SshError::CommandMissingExit { signal, stderr }) => {
                self.last_stderr.store(&stderr);
                debug!(host = %self.host, %signal, "command terminated by signal");
                Err(ExecutorError::Failed {
                    command: logged,
                    exit_code: None,
                    stderr,
                })
            }
            Err(source) => {
                self.last_stderr.store("");
                Err(ExecutorError::Transport {
                    host: self.host.clone(),
                    source,
                })
            }
        }
    }

    async fn upload(
        &self,
        local_path: &Utf8Path,
        remote_path: &str,
        mode: u32,
    ) -> Result<(), ExecutorError> {
        info!(host = %self.host, from = %local_path, to = remote_path, "uploading file");
        let client = Arc::clone(&self.client);
        let local = local_path.to_path_buf();
        let remote = remote_path.to_owned();
        let bar = transfer_bar(remote_path);
        let tick = bar.clone();

        let result = tokio::task::spawn_blocking(move || {
            let guard = client.lock().map_err(|err| SshError::SessionOpenFailed {
                message: err.to_string(),
            })?;
            let mut on_progress = |sent: u64, total: u64| {
                tick.set_length(total);
                tick.set_position(sent);
            };
            guard.upload_file(&local, &remote, mode, &mut on_progress)
        })
        .await
        .map_err(|err| ExecutorError::Task {
            message: err.to_string(),
        })?;
        bar.finish_and_clear();

        result
            .map(|sent| debug!(host = %self.host, bytes = sent, "upload complete"))
            .map_err(|source| ExecutorError::Transport {
                host: self.host.clone(),
                source,
            })
    }
}

fn transfer_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(label.to_owned());
    bar
}

impl Executor for RemoteExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Remote
    }

    fn target(&self) -> &str {
        &self.host
    }

    fn run_with_stdout<'a>(
        &'a self,
        program: &'a str,
        args: &'a [&'a str],
    ) -> ExecFuture<'a, String> {
        Box::pin(self.exec(program, args))
    }

    fn stage_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, ()> {
        Box::pin(self.upload(local_path, remote_path, mode))
    }

    fn last_stderr(&self) -> String {
        self.last_stderr.load()
    }
}
