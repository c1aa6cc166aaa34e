//! Operator and node configuration.
//!
//! [`OperatorConfig`] holds control-plane credentials and is persisted as
//! JSON by [`ConfigStore`]. [`NodeConfig`] holds per-invocation SSH
//! credentials and is never written to disk. [`RuntimeSettings`] carries
//! tool tuning loaded through `ortho-config`.

mod loader;
mod prompt;
mod settings;
mod store;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::executor::is_loopback;
use crate::ssh::SshAuth;

pub use loader::{ConfigLoader, CredentialValidator, MAX_PROMPT_ATTEMPTS, Session, ValidationFuture};
pub use prompt::{
    DialoguerPrompter, PromptError, Prompter, complete_node_config, prompt_operator_config,
};
pub use settings::{RuntimeSettings, SettingsError};
pub use store::{ConfigStore, ConfigStoreError, CredentialStore, state_dir};

/// Default project scope for new configurations.
pub const DEFAULT_TENANT: &str = "service";
/// Default region for new configurations.
pub const DEFAULT_REGION: &str = "RegionOne";
/// Default seconds to wait for long-running control-plane operations.
pub const DEFAULT_WAIT_PERIOD: u64 = 60;

/// Cloud-provider key material kept alongside the operator credentials.
///
/// `pf9ctl` stores and round-trips these fields but never uses them.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CloudCredentials {
    /// AWS IAM user name.
    pub aws_iam_username: String,
    /// AWS access key ID.
    pub aws_access_key: String,
    /// AWS secret access key.
    pub aws_secret_key: String,
    /// AWS region.
    pub aws_region: String,
    /// Azure tenant ID.
    pub azure_tenant: String,
    /// Azure application (client) ID.
    pub azure_application: String,
    /// Azure subscription ID.
    pub azure_subscription: String,
    /// Azure client secret.
    pub azure_secret: String,
    /// Path to a Google service-account key file.
    pub google_path: String,
    /// Google Cloud project name.
    pub google_project_name: String,
    /// Google service-account e-mail.
    pub google_service_email: String,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("aws_iam_username", &self.aws_iam_username)
            .field("aws_region", &self.aws_region)
            .field("azure_tenant", &self.azure_tenant)
            .field("google_project_name", &self.google_project_name)
            .finish_non_exhaustive()
    }
}

/// Control-plane credentials and connection preferences.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// HTTPS base URL of the control plane.
    #[serde(rename = "fqdn")]
    pub account_url: String,
    /// Identity-service user name.
    pub username: String,
    /// Identity-service password, in clear text while in memory.
    pub password: String,
    /// Project name or ID used to scope tokens.
    pub tenant: String,
    /// Region whose endpoint hosts the control-plane services.
    pub region: String,
    /// Seconds to wait for long-running control-plane operations.
    pub wait_period: u64,
    /// Disables TLS verification for control-plane calls.
    pub allow_insecure: bool,
    /// HTTPS proxy for control-plane calls and node commands.
    pub proxy_url: String,
    /// Comma-separated hosts that bypass the proxy.
    pub no_proxy: String,
    /// One-time MFA passcode; never persisted.
    pub mfa_token: String,
    /// Cloud-provider credentials.
    #[serde(flatten)]
    pub cloud: CloudCredentials,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            account_url: String::new(),
            username: String::new(),
            password: String::new(),
            tenant: DEFAULT_TENANT.to_owned(),
            region: DEFAULT_REGION.to_owned(),
            wait_period: DEFAULT_WAIT_PERIOD,
            allow_insecure: false,
            proxy_url: String::new(),
            no_proxy: String::new(),
            mfa_token: String::new(),
            cloud: CloudCredentials::default(),
        }
    }
}

impl std::fmt::Debug for OperatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorConfig")
            .field("account_url", &self.account_url)
            .field("username", &self.username)
            .field("password", &crate::scrub::MASK)
            .field("tenant", &self.tenant)
            .field("region", &self.region)
            .field("wait_period", &self.wait_period)
            .field("allow_insecure", &self.allow_insecure)
            .field("proxy_url", &crate::scrub::scrub_command(&self.proxy_url))
            .field("no_proxy", &self.no_proxy)
            .field("cloud", &self.cloud)
            .finish_non_exhaustive()
    }
}

impl OperatorConfig {
    /// Names of required fields that are empty.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<String> {
        [
            ("fqdn", &self.account_url),
            ("username", &self.username),
            ("password", &self.password),
            ("region", &self.region),
            ("tenant", &self.tenant),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_owned())
        .collect()
    }

    /// Ensures every required field is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFields`] listing the empty fields.
    pub fn require_complete(&self) -> Result<(), ConfigError> {
        let fields = self.missing_fields();
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields { fields })
        }
    }

    /// Copies every non-empty field of `stored` into `self`.
    ///
    /// `mfa_token` is never copied; it only comes from the command line.
    pub fn absorb(&mut self, stored: &Self) {
        fn take(target: &mut String, source: &str) {
            if !source.trim().is_empty() {
                source.clone_into(target);
            }
        }

        take(&mut self.account_url, &stored.account_url);
        take(&mut self.username, &stored.username);
        take(&mut self.password, &stored.password);
        take(&mut self.tenant, &stored.tenant);
        take(&mut self.region, &stored.region);
        take(&mut self.proxy_url, &stored.proxy_url);
        take(&mut self.no_proxy, &stored.no_proxy);
        if stored.wait_period > 0 {
            self.wait_period = stored.wait_period;
        }
        self.allow_insecure |= stored.allow_insecure;
        self.cloud = stored.cloud.clone();
    }

    /// Parses the account URL, assuming `https://` when no scheme is given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAccountUrl`] when the value is not a URL
    /// with a host.
    pub fn account_base(&self) -> Result<Url, ConfigError> {
        let raw = self.account_url.trim().trim_end_matches('/');
        let candidate = if raw.contains("://") {
            raw.to_owned()
        } else {
            format!("https://{raw}")
        };
        let invalid = |message: String| ConfigError::InvalidAccountUrl {
            url: self.account_url.clone(),
            message,
        };
        let url = Url::parse(&candidate).map_err(|err| invalid(err.to_string()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid(String::from("missing host")));
        }
        Ok(url)
    }

    /// Proxy URL, when one is configured.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        non_empty(&self.proxy_url)
    }

    /// MFA passcode, when one was supplied.
    #[must_use]
    pub fn mfa(&self) -> Option<&str> {
        non_empty(&self.mfa_token)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed)
    }
}

/// Per-invocation credentials for reaching target nodes.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct NodeConfig {
    /// SSH user on remote nodes.
    pub user: String,
    /// SSH password.
    pub password: Option<String>,
    /// Path to an SSH private key.
    pub ssh_key: Option<Utf8PathBuf>,
    /// Target addresses; empty means the local host.
    pub ips: Vec<String>,
    /// Password fed to `sudo -S` on the target.
    pub sudo_password: Option<String>,
    /// MFA passcode supplied on the command line.
    pub mfa_token: Option<String>,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| crate::scrub::MASK))
            .field("ssh_key", &self.ssh_key)
            .field("ips", &self.ips)
            .field(
                "sudo_password",
                &self.sudo_password.as_ref().map(|_| crate::scrub::MASK),
            )
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    /// Returns `true` when any target address is not loopback.
    #[must_use]
    pub fn targets_remote(&self) -> bool {
        self.ips.iter().any(|ip| !is_loopback(ip))
    }

    /// Target addresses, defaulting to the loopback address.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        if self.ips.is_empty() {
            vec![String::from("127.0.0.1")]
        } else {
            self.ips.clone()
        }
    }

    /// Checks the remote-credential invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNodeConfig`] when a remote target lacks
    /// a user or does not have exactly one of password and key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.targets_remote() {
            return Ok(());
        }
        self.ssh_auth().map(drop)
    }

    /// SSH authentication derived from the configured credentials.
    ///
    /// # Errors
    ///
    /// Same as [`NodeConfig::validate`].
    pub fn ssh_auth(&self) -> Result<SshAuth, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidNodeConfig {
            message: message.to_owned(),
        };
        if self.user.trim().is_empty() {
            return Err(invalid("a user is required for remote nodes"));
        }
        let password = self.password.as_deref().filter(|pw| !pw.is_empty());
        let key = self.ssh_key.as_ref().filter(|path| !path.as_str().is_empty());
        match (password, key) {
            (Some(_), Some(_)) => Err(invalid("set either a password or an ssh key, not both")),
            (Some(pw), None) => Ok(SshAuth::Password(pw.to_owned())),
            (None, Some(path)) => Ok(SshAuth::PrivateKey(path.clone())),
            (None, None) => Err(invalid("a password or an ssh key is required for remote nodes")),
        }
    }
}

/// Errors raised while loading, validating or capturing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file exists yet.
    #[error("no configuration found at {path}; run `pf9ctl config create`")]
    NoConfig {
        /// Location that was searched.
        path: Utf8PathBuf,
    },
    /// Required operator fields are empty.
    #[error("configuration is missing required fields: {}", .fields.join(", "))]
    MissingFields {
        /// Names of the empty fields.
        fields: Vec<String>,
    },
    /// The identity service rejected the credentials.
    #[error("invalid credentials: {message}")]
    InvalidCreds {
        /// Human-readable error message.
        message: String,
    },
    /// The region has no internal endpoint.
    #[error("region {region} was not found in the service catalog")]
    InvalidRegion {
        /// Region that was requested.
        region: String,
    },
    /// Interactive capture failed too many times.
    #[error("giving up after {attempts} invalid configuration attempts")]
    MaxAttemptsExceeded {
        /// Number of prompts issued.
        attempts: u32,
    },
    /// The account URL is not a usable HTTPS base.
    #[error("invalid account url {url}: {message}")]
    InvalidAccountUrl {
        /// URL as configured.
        url: String,
        /// Human-readable error message.
        message: String,
    },
    /// Node credentials break the remote-credential invariant.
    #[error("invalid node configuration: {message}")]
    InvalidNodeConfig {
        /// Human-readable error message.
        message: String,
    },
    /// Reading or writing the configuration file failed.
    #[error(transparent)]
    Store(#[from] ConfigStoreError),
    /// The operator could not be prompted.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

impl ConfigError {
    /// Returns `true` for failures that a fresh prompt can fix.
    #[must_use]
    pub const fn is_promptable(&self) -> bool {
        matches!(
            self,
            Self::NoConfig { .. }
                | Self::MissingFields { .. }
                | Self::InvalidCreds { .. }
                | Self::InvalidRegion { .. }
                | Self::InvalidAccountUrl { .. }
        )
    }
}

#[cfg(test)]
mod tests;
