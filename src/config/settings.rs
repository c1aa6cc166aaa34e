//! Runtime tuning knobs loaded via `ortho-config`.
//!
//! These settings never carry credentials. They merge defaults, a
//! `pf9ctl.toml` file discovered in the usual locations, and `PF9CTL_*`
//! environment variables, in that order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Timeouts, waits and retry parameters for a `pf9ctl` run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PF9CTL",
    discovery(
        app_name = "pf9ctl",
        env_var = "PF9CTL_CONFIG_PATH",
        config_file_name = "pf9ctl.toml",
        dotfile_name = ".pf9ctl.toml",
        project_file_name = "pf9ctl.toml"
    )
)]
pub struct RuntimeSettings {
    /// Seconds allowed for the SSH TCP dial, handshake and authentication.
    #[ortho_config(default = 15)]
    pub ssh_connect_timeout_secs: u64,
    /// Port of the SSH daemon on remote nodes.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Seconds to wait after the installer for the host agent to settle.
    #[ortho_config(default = 60)]
    pub host_agent_settle_secs: u64,
    /// Seconds to wait after decommission for the agent to drain.
    #[ortho_config(default = 50)]
    pub decommission_wait_secs: u64,
    /// Total attempts for calls that retry on 404.
    #[ortho_config(default = 5)]
    pub retry_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[ortho_config(default = 1000)]
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single retry delay, in milliseconds.
    #[ortho_config(default = 16000)]
    pub retry_max_delay_ms: u64,
    /// Per-request timeout for control-plane HTTP calls, in seconds.
    #[ortho_config(default = 60)]
    pub http_timeout_secs: u64,
    /// Seconds to wait for a new cluster to converge.
    #[ortho_config(default = 900)]
    pub converge_timeout_secs: u64,
    /// Seconds between cluster status polls.
    #[ortho_config(default = 15)]
    pub converge_poll_secs: u64,
}

/// Errors raised while loading [`RuntimeSettings`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SettingsError {
    /// Merging configuration layers failed.
    #[error("runtime settings parsing failed: {0}")]
    Parse(String),
    /// A setting holds a value that cannot work.
    #[error("invalid runtime setting {field}: {message}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// Human-readable error message.
        message: &'static str,
    },
}

impl RuntimeSettings {
    /// Loads settings from defaults, files and environment variables,
    /// ignoring the process command line.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] when merging fails and
    /// [`SettingsError::Invalid`] when a value is out of range.
    pub fn load_without_cli_args() -> Result<Self, SettingsError> {
        let settings = Self::load_from_iter([std::ffi::OsString::from("pf9ctl")])
            .map_err(|err| SettingsError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings that would make every run fail.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first bad field.
    pub const fn validate(&self) -> Result<(), SettingsError> {
        if self.retry_attempts == 0 {
            return Err(SettingsError::Invalid {
                field: "retry_attempts",
                message: "at least one attempt is required",
            });
        }
        if self.ssh_port == 0 {
            return Err(SettingsError::Invalid {
                field: "ssh_port",
                message: "port must be non-zero",
            });
        }
        if self.converge_poll_secs == 0 {
            return Err(SettingsError::Invalid {
                field: "converge_poll_secs",
                message: "poll interval must be non-zero",
            });
        }
        Ok(())
    }

    /// Per-request HTTP timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Built-in values, identical to the field defaults above.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            ssh_connect_timeout_secs: 15,
            ssh_port: 22,
            host_agent_settle_secs: 60,
            decommission_wait_secs: 50,
            retry_attempts: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 16_000,
            http_timeout_secs: 60,
            converge_timeout_secs: 900,
            converge_poll_secs: 15,
        }
    }
}
