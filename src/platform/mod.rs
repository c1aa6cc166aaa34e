//! Operating-system detection and host prerequisite checks.
//!
//! Everything here runs through an [`Executor`], so the same probe works on
//! the operator's host and on remote nodes.

mod checks;

use thiserror::Error;
use tracing::{debug, info};

use crate::executor::{Executor, ExecutorError};

pub use checks::{
    CheckSeverity, PrereqCheck, REQUIRED_PORTS, hard_failures, installed_packages, run_checks,
};

const OS_RELEASE: &str = "/etc/os-release";
const REDHAT_RELEASE: &str = "/etc/redhat-release";

/// Minimum supported Ubuntu major release.
const MIN_UBUNTU: (u32, u32) = (16, 0);
/// Minimum supported CentOS/RHEL release.
const MIN_RHEL: (u32, u32) = (7, 5);

/// Package family of a supported distribution.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OsFamily {
    /// Ubuntu and other dpkg-based systems.
    Debian,
    /// CentOS and RHEL.
    Rhel,
}

impl OsFamily {
    /// Suffix of the host-agent installer for this family.
    #[must_use]
    pub const fn installer_flavour(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Rhel => "redhat",
        }
    }
}

/// A detected, supported operating system.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OsInfo {
    /// Package family.
    pub family: OsFamily,
    /// Distribution ID, for example `ubuntu`.
    pub id: String,
    /// Release version as reported by the host.
    pub version: String,
}

/// Errors raised while probing a host.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The distribution or release is not supported.
    #[error("unsupported operating system: {id} {version}")]
    UnsupportedOs {
        /// Distribution ID, empty when unknown.
        id: String,
        /// Release version, empty when unknown.
        version: String,
    },
    /// A probe command could not be run.
    #[error("failed to {action}: {source}")]
    Command {
        /// What the probe was doing.
        action: &'static str,
        /// Underlying executor error.
        #[source]
        source: ExecutorError,
    },
}

/// Fields of interest from `/etc/os-release`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OsRelease {
    /// `ID`, lower-cased.
    pub id: String,
    /// `VERSION_ID`.
    pub version_id: String,
    /// `PRETTY_NAME`.
    pub pretty_name: String,
}

impl OsRelease {
    /// Parses `KEY=value` lines, stripping optional quotes.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut release = Self::default();
        for line in text.lines() {
            let Some((key, raw)) = line.trim().split_once('=') else {
                continue;
            };
            let value = raw.trim().trim_matches('"').trim_matches('\'').to_owned();
            match key.trim() {
                "ID" => release.id = value.to_ascii_lowercase(),
                "VERSION_ID" => release.version_id = value,
                "PRETTY_NAME" => release.pretty_name = value,
                _ => {}
            }
        }
        release
    }
}

/// Parses the leading `major[.minor]` of a version string.
fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version
        .trim()
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|part| !part.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|part| part.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Extracts the version from a line such as
/// `CentOS Linux release 7.9.2009 (Core)`.
fn redhat_release_version(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let position = words.iter().position(|word| *word == "release")?;
    words.get(position + 1).map(|word| (*word).to_owned())
}

/// Classifies a parsed release, consulting `redhat_release` for the minor
/// version that CentOS omits from `VERSION_ID`.
///
/// # Errors
///
/// Returns [`ProbeError::UnsupportedOs`] for anything other than Ubuntu 16+
/// or CentOS/RHEL 7.5+.
pub fn classify(release: &OsRelease, redhat_release: Option<&str>) -> Result<OsInfo, ProbeError> {
    let unsupported = |version: &str| ProbeError::UnsupportedOs {
        id: release.id.clone(),
        version: version.to_owned(),
    };

    match release.id.as_str() {
        "ubuntu" => {
            let version = major_minor(&release.version_id).ok_or_else(|| unsupported(&release.version_id))?;
            if version < MIN_UBUNTU {
                return Err(unsupported(&release.version_id));
            }
            Ok(OsInfo {
                family: OsFamily::Debian,
                id: release.id.clone(),
                version: release.version_id.clone(),
            })
        }
        "centos" | "rhel" => {
            let full = redhat_release
                .and_then(redhat_release_version)
                .unwrap_or_else(|| release.version_id.clone());
            let version = major_minor(&full).ok_or_else(|| unsupported(&full))?;
            if version < MIN_RHEL {
                return Err(unsupported(&full));
            }
            Ok(OsInfo {
                family: OsFamily::Rhel,
                id: release.id.clone(),
                version: full,
            })
        }
        _ => Err(unsupported(&release.version_id)),
    }
}

/// Reads `/etc/os-release` on the target and classifies it.
///
/// # Errors
///
/// Returns [`ProbeError::UnsupportedOs`] for unsupported systems and
/// [`ProbeError::Command`] when the release file cannot be read.
pub async fn detect_os(executor: &dyn Executor) -> Result<OsInfo, ProbeError> {
    let text = executor
        .run_with_stdout("cat", &[OS_RELEASE])
        .await
        .map_err(|source| ProbeError::Command {
            action: "read /etc/os-release",
            source,
        })?;
    let release = OsRelease::parse(&text);
    debug!(host = executor.target(), id = %release.id, version = %release.version_id, "read os-release");

    let redhat = if matches!(release.id.as_str(), "centos" | "rhel") {
        executor.run_with_stdout("cat", &[REDHAT_RELEASE]).await.ok()
    } else {
        None
    };

    let info = classify(&release, redhat.as_deref())?;
    info!(host = executor.target(), id = %info.id, version = %info.version, "detected operating system");
    Ok(info)
}

#[cfg(test)]
mod tests;
