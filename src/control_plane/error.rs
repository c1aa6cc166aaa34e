//! Errors raised by the control-plane client.

use thiserror::Error;

/// Errors raised by [`super::ControlPlaneApi`] operations.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The service answered with a non-success status.
    #[error("{op} returned HTTP {status}: {body}")]
    Status {
        /// Operation that failed.
        op: &'static str,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
    /// The request never produced a response.
    #[error("{op} request failed: {message}")]
    Transport {
        /// Operation that failed.
        op: &'static str,
        /// Human-readable error message.
        message: String,
    },
    /// The response could not be decoded.
    #[error("{op} returned an unexpected payload: {message}")]
    Decode {
        /// Operation that failed.
        op: &'static str,
        /// Human-readable error message.
        message: String,
    },
    /// A cluster with the requested name already exists.
    #[error("cluster {name} already exists")]
    ClusterExists {
        /// Requested cluster name.
        name: String,
    },
    /// No cloud provider of type `local` is registered.
    #[error("no local cloud provider is registered")]
    NoLocalNodePool,
}

impl ControlPlaneError {
    /// Name of the failed operation.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Status { op, .. } | Self::Transport { op, .. } | Self::Decode { op, .. } => op,
            Self::ClusterExists { .. } => "CreateCluster",
            Self::NoLocalNodePool => "GetNodePool",
        }
    }

    /// HTTP status, when the service answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for an HTTP 404 answer.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
