//! The error surface shown to operators and mapped to exit codes.
//!
//! Module errors convert into [`Pf9Error`]; each variant belongs to exactly
//! one [`ErrorCategory`], and the category decides the process exit code.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{ConfigError, SettingsError};
use crate::control_plane::ControlPlaneError;
use crate::executor::ExecutorError;
use crate::orchestrator::Stage;
use crate::platform::{PrereqCheck, ProbeError};
use crate::ssh::SshErrorKind;

/// Broad class of a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    /// Missing or invalid operator or node credentials.
    Config,
    /// Unsupported OS or failing prerequisites.
    Platform,
    /// A command failed locally or over SSH.
    Execution,
    /// The control plane answered with an error.
    ControlPlane,
    /// The operator interrupted the command.
    Cancelled,
}

impl ErrorCategory {
    /// Process exit code for the category.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Config => 1,
            Self::Platform => 2,
            Self::Execution => 3,
            Self::ControlPlane => 4,
            Self::Cancelled => 130,
        }
    }
}

/// Any failure a `pf9ctl` command can end with.
#[derive(Debug, Error)]
pub enum Pf9Error {
    /// No operator configuration is stored.
    #[error("no configuration found at {path}; run `pf9ctl config create`")]
    NoConfig {
        /// Location that was searched.
        path: Utf8PathBuf,
    },
    /// Required configuration fields are empty.
    #[error("configuration is missing required fields: {}", .fields.join(", "))]
    MissingFields {
        /// Names of the empty fields.
        fields: Vec<String>,
    },
    /// The identity service rejected the credentials.
    #[error("invalid credentials: {message}")]
    InvalidCreds {
        /// Reason given by the identity service.
        message: String,
    },
    /// The configured region has no endpoint.
    #[error("invalid region {region}")]
    InvalidRegion {
        /// Region that was requested.
        region: String,
    },
    /// Interactive configuration failed too many times.
    #[error("giving up after {attempts} invalid configuration attempts")]
    MaxAttemptsExceeded {
        /// Number of prompts issued.
        attempts: u32,
    },
    /// Any other configuration problem.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },
    /// The host runs an unsupported operating system.
    #[error("unsupported operating system: {id} {version}")]
    UnsupportedOs {
        /// Distribution ID.
        id: String,
        /// Release version.
        version: String,
    },
    /// At least one fatal prerequisite check failed.
    #[error("prerequisite checks failed: {}", failed_names(.checks))]
    PrereqFailed {
        /// Every check that ran, passing ones included.
        checks: Vec<PrereqCheck>,
    },
    /// A command failed during `stage`.
    #[error("{stage} failed: {source}")]
    ExecutorFailed {
        /// Stage that ran the command.
        stage: Stage,
        /// Underlying executor error.
        #[source]
        source: ExecutorError,
    },
    /// The installer finished but the node never wrote its host ID.
    #[error("no host_id found in /etc/pf9/host_id.conf on {host}")]
    HostIdMissing {
        /// Host that was prepared.
        host: String,
    },
    /// A control-plane call failed.
    #[error("{op} failed{}: {body}", describe_status(.status.as_ref()))]
    ControlPlaneFailed {
        /// Operation name.
        op: &'static str,
        /// HTTP status, absent for transport failures.
        status: Option<u16>,
        /// Truncated response body or error message.
        body: String,
    },
    /// A named cluster does not exist.
    #[error("cluster {name} not found")]
    ClusterNotFound {
        /// Name that was looked up.
        name: String,
    },
    /// A cluster did not reach the `ok` state.
    #[error("cluster {cluster} did not converge: last status {status:?}")]
    ClusterNotConverged {
        /// Cluster ID.
        cluster: String,
        /// Last status reported.
        status: String,
    },
    /// The SSH transport failed.
    #[error("ssh {kind} on {host}: {cause}")]
    SshFailed {
        /// Transport error kind.
        kind: SshErrorKind,
        /// Host that was being reached.
        host: String,
        /// Transport error message.
        cause: String,
    },
    /// A local file could not be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that failed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The operator interrupted the command.
    #[error("cancelled by operator")]
    Cancelled,
}

fn failed_names(checks: &[PrereqCheck]) -> String {
    checks
        .iter()
        .filter(|check| check.is_hard_failure())
        .map(|check| check.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_status(status: Option<&u16>) -> String {
    status.map(|code| format!(" with HTTP {code}")).unwrap_or_default()
}

impl Pf9Error {
    /// Category of the failure.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NoConfig { .. }
            | Self::MissingFields { .. }
            | Self::InvalidCreds { .. }
            | Self::InvalidRegion { .. }
            | Self::MaxAttemptsExceeded { .. }
            | Self::Config { .. } => ErrorCategory::Config,
            Self::UnsupportedOs { .. } | Self::PrereqFailed { .. } => ErrorCategory::Platform,
            Self::ExecutorFailed { .. }
            | Self::HostIdMissing { .. }
            | Self::SshFailed { .. }
            | Self::Io { .. } => ErrorCategory::Execution,
            Self::ControlPlaneFailed { .. }
            | Self::ClusterNotFound { .. }
            | Self::ClusterNotConverged { .. } => ErrorCategory::ControlPlane,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Process exit code for the failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// Wraps an executor error raised during `stage`.
    ///
    /// Transport failures surface as [`Pf9Error::SshFailed`] so the
    /// operator sees which part of the SSH exchange broke.
    #[must_use]
    pub fn executor(stage: Stage, err: ExecutorError) -> Self {
        match err {
            ExecutorError::Transport { host, source } => Self::SshFailed {
                kind: source.kind(),
                host,
                cause: source.to_string(),
            },
            ExecutorError::Credentials { message } => Self::Config { message },
            other => Self::ExecutorFailed {
                stage,
                source: other,
            },
        }
    }

    /// Wraps a probe error raised during `stage`.
    #[must_use]
    pub fn probe(stage: Stage, err: ProbeError) -> Self {
        match err {
            ProbeError::UnsupportedOs { id, version } => Self::UnsupportedOs { id, version },
            ProbeError::Command { source, .. } => Self::executor(stage, source),
        }
    }
}

impl From<ConfigError> for Pf9Error {
    fn from(value: ConfigError) -> Self {
        match value {
            ConfigError::NoConfig { path } => Self::NoConfig { path },
            ConfigError::MissingFields { fields } => Self::MissingFields { fields },
            ConfigError::InvalidCreds { message } => Self::InvalidCreds { message },
            ConfigError::InvalidRegion { region } => Self::InvalidRegion { region },
            ConfigError::MaxAttemptsExceeded { attempts } => Self::MaxAttemptsExceeded { attempts },
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<SettingsError> for Pf9Error {
    fn from(value: SettingsError) -> Self {
        Self::Config {
            message: value.to_string(),
        }
    }
}

impl From<ControlPlaneError> for Pf9Error {
    fn from(value: ControlPlaneError) -> Self {
        let op = value.op();
        let status = value.status();
        let body = match value {
            ControlPlaneError::Status { body, .. } => body,
            other => other.to_string(),
        };
        Self::ControlPlaneFailed { op, status, body }
    }
}
