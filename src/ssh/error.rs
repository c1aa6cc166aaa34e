//! Error types for the SSH transport.

use thiserror::Error;

/// Coarse classification of an [`SshError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SshErrorKind {
    /// The TCP connection or SSH handshake could not be established.
    DialFailed,
    /// The server rejected the supplied credentials.
    AuthFailed,
    /// A session channel or subsystem could not be opened.
    SessionOpenFailed,
    /// A remote command exited with a non-zero status.
    CommandExited,
    /// A remote command ended without reporting an exit status.
    CommandMissingExit,
    /// A file transfer failed.
    SftpFailed,
}

impl SshErrorKind {
    /// Stable name used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DialFailed => "dial-failed",
            Self::AuthFailed => "auth-failed",
            Self::SessionOpenFailed => "session-open-failed",
            Self::CommandExited => "command-exited",
            Self::CommandMissingExit => "command-missing-exit",
            Self::SftpFailed => "sftp-failed",
        }
    }
}

impl std::fmt::Display for SshErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by [`super::SshClient`].
#[derive(Debug, Error)]
pub enum SshError {
    /// Raised when the TCP dial or SSH handshake fails.
    #[error("failed to connect to {addr}: {message}")]
    DialFailed {
        /// Address that was dialled.
        addr: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when authentication is rejected.
    #[error("authentication failed for user {user}: {message}")]
    AuthFailed {
        /// User the client tried to authenticate as.
        user: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a channel or the SFTP subsystem cannot be opened.
    #[error("failed to open ssh session: {message}")]
    SessionOpenFailed {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a remote command exits non-zero.
    #[error("remote command exited with status {code}")]
    CommandExited {
        /// Remote exit status.
        code: i32,
        /// Standard error captured from the command.
        stderr: String,
    },
    /// Raised when a remote command is terminated without an exit status.
    #[error("remote command ended without an exit status ({signal})")]
    CommandMissingExit {
        /// Signal name reported by the server, if any.
        signal: String,
        /// Standard error captured from the command.
        stderr: String,
    },
    /// Raised when an SFTP transfer fails.
    #[error("sftp transfer of {path} failed: {message}")]
    SftpFailed {
        /// Path involved in the transfer.
        path: String,
        /// Human-readable error message.
        message: String,
    },
}

impl SshError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> SshErrorKind {
        match self {
            Self::DialFailed { .. } => SshErrorKind::DialFailed,
            Self::AuthFailed { .. } => SshErrorKind::AuthFailed,
            Self::SessionOpenFailed { .. } => SshErrorKind::SessionOpenFailed,
            Self::CommandExited { .. } => SshErrorKind::CommandExited,
            Self::CommandMissingExit { .. } => SshErrorKind::CommandMissingExit,
            Self::SftpFailed { .. } => SshErrorKind::SftpFailed,
        }
    }

    pub(crate) fn session(err: impl std::fmt::Display) -> Self {
        Self::SessionOpenFailed {
            message: err.to_string(),
        }
    }

    pub(crate) fn sftp(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::SftpFailed {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
