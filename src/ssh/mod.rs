//! Authenticated SSH session with a long-lived SFTP subsystem.
//!
//! The client is blocking; async callers wrap it in
//! `tokio::task::spawn_blocking`. Each [`SshClient::run_command`] call opens
//! a fresh exec channel on the shared session, so one client can serve every
//! command of a pipeline run.
//!
//! The configured timeout bounds the dial, handshake and authentication
//! only. Command and transfer I/O is unbounded once the session is up.

mod error;
mod progress;

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ssh2::{OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, warn};

pub use error::{SshError, SshErrorKind};
pub use progress::ProgressReader;

use crate::scrub::scrub_command;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_CHUNK: usize = 16 * 1024;

/// How the client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    /// Public-key authentication with a private key file.
    PrivateKey(Utf8PathBuf),
    /// Password authentication.
    Password(String),
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            Self::Password(_) => f.write_str("Password(*****)"),
        }
    }
}

/// Connection parameters for [`SshClient::connect`].
#[derive(Clone, Debug)]
pub struct SshParams {
    /// Host name or IP address.
    pub host: String,
    /// TCP port of the SSH daemon.
    pub port: u16,
    /// Remote user name.
    pub user: String,
    /// Authentication material.
    pub auth: SshAuth,
    /// Upper bound on the TCP dial, handshake and authentication.
    pub timeout: Duration,
}

/// Output of a successful remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SshOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, scrubbed of credentials.
    pub stderr: String,
}

/// An authenticated SSH session and its SFTP subclient.
pub struct SshClient {
    host: String,
    session: Session,
    sftp: Sftp,
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl SshClient {
    /// Dials the host, authenticates and opens the SFTP subsystem.
    ///
    /// Host keys are accepted without verification.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::DialFailed`] when the host is unreachable or the
    /// handshake fails, [`SshError::AuthFailed`] when credentials are
    /// rejected, and [`SshError::SessionOpenFailed`] or
    /// [`SshError::SftpFailed`] when the SFTP subsystem cannot be started.
    pub fn connect(params: &SshParams) -> Result<Self, SshError> {
        let addr_text = format!("{}:{}", params.host, params.port);
        let dial_err = |message: String| SshError::DialFailed {
            addr: addr_text.clone(),
            message,
        };

        let addr = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|err| dial_err(err.to_string()))?
            .next()
            .ok_or_else(|| dial_err(String::from("host name did not resolve")))?;
        let tcp = TcpStream::connect_timeout(&addr, params.timeout)
            .map_err(|err| dial_err(err.to_string()))?;

        let mut session = Session::new().map_err(SshError::session)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(params.timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|err| dial_err(err.to_string()))?;

        let auth_result = match &params.auth {
            SshAuth::PrivateKey(path) => {
                session.userauth_pubkey_file(&params.user, None, path.as_std_path(), None)
            }
            SshAuth::Password(password) => session.userauth_password(&params.user, password),
        };
        let auth_failed = |message: String| SshError::AuthFailed {
            user: params.user.clone(),
            message,
        };
        auth_result.map_err(|err| auth_failed(err.to_string()))?;
        if !session.authenticated() {
            return Err(auth_failed(String::from("server did not accept credentials")));
        }

        let sftp = session.sftp().map_err(SshError::session)?;
        session.set_timeout(0);
        debug!(host = %params.host, user = %params.user, "ssh session established");

        Ok(Self {
            host: params.host.clone(),
            session,
            sftp,
        })
    }

    /// Host this client is connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs `command` in a fresh exec channel, writing `stdin` first.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::CommandExited`] for a non-zero exit,
    /// [`SshError::CommandMissingExit`] when the command was killed by a
    /// signal, and [`SshError::SessionOpenFailed`] when the channel cannot be
    /// opened or read.
    pub fn run_command(&self, command: &str, stdin: Option<&str>) -> Result<SshOutput, SshError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(SshError::session)?;
        channel.exec(command).map_err(SshError::session)?;

        if let Some(input) = stdin {
            channel
                .write_all(input.as_bytes())
                .map_err(SshError::session)?;
        }
        channel.send_eof().map_err(SshError::session)?;

        let mut stdout_stream = channel.stream(0);
        let mut stderr_stream = channel.stderr();
        self.session.set_blocking(false);
        let drained = drain_streams(&mut stdout_stream, &mut stderr_stream, || channel.eof());
        self.session.set_blocking(true);
        let (stdout, raw_stderr) = drained.map_err(SshError::session)?;
        let stderr = scrub_command(&raw_stderr);
        channel.wait_close().map_err(SshError::session)?;

        let exit_signal = channel
            .exit_signal()
            .map_err(SshError::session)?
            .exit_signal;
        if let Some(signal) = exit_signal {
            return Err(SshError::CommandMissingExit { signal, stderr });
        }

        let code = channel.exit_status().map_err(SshError::session)?;
        if code != 0 {
            return Err(SshError::CommandExited { code, stderr });
        }
        Ok(SshOutput { stdout, stderr })
    }

    /// Uploads `local` to `remote` with permission bits `mode`.
    ///
    /// `on_progress` receives `(bytes_sent, total_bytes)`. A partially
    /// written remote file is unlinked before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::SftpFailed`] when the local file cannot be read or
    /// the remote file cannot be written.
    pub fn upload_file(
        &self,
        local: &Utf8Path,
        remote: &str,
        mode: u32,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<u64, SshError> {
        let file = std::fs::File::open(local).map_err(|err| SshError::sftp(local.as_str(), err))?;
        let total = file
            .metadata()
            .map_err(|err| SshError::sftp(local.as_str(), err))?
            .len();

        let remote_path = Path::new(remote);
        let mut remote_file = self
            .sftp
            .open_mode(
                remote_path,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                i32::try_from(mode).unwrap_or(0o644),
                OpenType::File,
            )
            .map_err(|err| SshError::sftp(remote, err))?;

        let mut reader = ProgressReader::new(file, total, on_progress);
        copy_or_discard(&mut reader, remote_file, remote, || {
            self.sftp.unlink(remote_path).map_err(io::Error::other)
        })
    }

    /// Downloads `remote` into `local`, created with permission bits `mode`.
    ///
    /// A partially written local file is removed before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::SftpFailed`] when either side of the transfer
    /// fails.
    pub fn download_file(
        &self,
        remote: &str,
        local: &Utf8Path,
        mode: u32,
        on_progress: &mut dyn FnMut(u64, u64),
    ) -> Result<u64, SshError> {
        let mut remote_file = self
            .sftp
            .open(Path::new(remote))
            .map_err(|err| SshError::sftp(remote, err))?;
        let total = remote_file
            .stat()
            .ok()
            .and_then(|stat| stat.size)
            .unwrap_or(0);

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true).mode(mode);
        let local_file = options
            .open(local)
            .map_err(|err| SshError::sftp(local.as_str(), err))?;

        let mut reader = ProgressReader::new(&mut remote_file, total, on_progress);
        copy_or_discard(&mut reader, local_file, remote, || std::fs::remove_file(local))
    }
}

/// Copies `reader` into `writer`; on failure closes `writer` and runs
/// `discard` to remove the partial destination.
fn copy_or_discard<R, W, D>(reader: &mut R, mut writer: W, path: &str, discard: D) -> Result<u64, SshError>
where
    R: Read,
    W: Write,
    D: FnOnce() -> io::Result<()>,
{
    match io::copy(reader, &mut writer) {
        Ok(copied) => Ok(copied),
        Err(err) => {
            drop(writer);
            if let Err(cleanup) = discard() {
                warn!(path, error = %cleanup, "failed to remove partial transfer");
            }
            Err(SshError::sftp(path, err))
        }
    }
}

/// Reads `stdout` and `stderr` in turn until neither yields data and
/// `at_eof` reports the remote end closed.
///
/// `WouldBlock` on one stream moves on to the other, so a command that
/// fills its stderr window cannot stall the stdout reader.
fn drain_streams<O, E, F>(stdout: &mut O, stderr: &mut E, at_eof: F) -> io::Result<(String, String)>
where
    O: Read,
    E: Read,
    F: Fn() -> bool,
{
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = vec![0_u8; READ_CHUNK];
    loop {
        let read_out = pump(stdout, &mut buf, &mut out)?;
        let read_err = pump(stderr, &mut buf, &mut err)?;
        if read_out || read_err {
            continue;
        }
        if at_eof() {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

fn pump<R: Read>(source: &mut R, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<bool> {
    match source.read(buf) {
        Ok(0) => Ok(false),
        Ok(read) => {
            sink.extend_from_slice(buf.get(..read).unwrap_or_default());
            Ok(true)
        }
        Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        if let Err(err) = self.session.disconnect(None, "pf9ctl closing session", None) {
            debug!(host = %self.host, error = %err, "ssh disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests;
