//! Chooses between the local and remote executor for a node.

use std::net::IpAddr;
use std::time::Duration;

use tracing::info;

use super::{Executor, ExecutorError, LocalExecutor, RemoteExecutor};
use crate::config::{NodeConfig, RuntimeSettings};
use crate::ssh::SshParams;

/// Returns `true` for an empty address, `localhost` or a loopback IP.
#[must_use]
pub fn is_loopback(ip: &str) -> bool {
    let addr = ip.trim();
    addr.is_empty()
        || addr.eq_ignore_ascii_case("localhost")
        || addr.parse::<IpAddr>().is_ok_and(|parsed| parsed.is_loopback())
}

/// Builds the executor for a whole node configuration.
///
/// When every configured IP is loopback (or none is given) commands run
/// locally. Otherwise the executor targets the first non-loopback IP over
/// SSH.
///
/// # Errors
///
/// Returns [`ExecutorError::Credentials`] when SSH credentials are missing or
/// ambiguous, and [`ExecutorError::Transport`] when the connection fails.
pub async fn executor_for(
    proxy_url: Option<&str>,
    node: &NodeConfig,
    settings: &RuntimeSettings,
) -> Result<Box<dyn Executor>, ExecutorError> {
    match node.ips.iter().find(|ip| !is_loopback(ip)) {
        Some(remote) => executor_for_host(remote, proxy_url, node, settings).await,
        None => Ok(Box::new(
            LocalExecutor::new(proxy_url).with_sudo_password(node.sudo_password.as_deref()),
        )),
    }
}

/// Builds the executor for a single `host` of a node configuration.
///
/// # Errors
///
/// Same as [`executor_for`].
pub async fn executor_for_host(
    host: &str,
    proxy_url: Option<&str>,
    node: &NodeConfig,
    settings: &RuntimeSettings,
) -> Result<Box<dyn Executor>, ExecutorError> {
    if is_loopback(host) {
        return Ok(Box::new(
            LocalExecutor::new(proxy_url).with_sudo_password(node.sudo_password.as_deref()),
        ));
    }

    let auth = node
        .ssh_auth()
        .map_err(|err| ExecutorError::Credentials {
            message: err.to_string(),
        })?;
    let params = SshParams {
        host: host.trim().to_owned(),
        port: settings.ssh_port,
        user: node.user.clone(),
        auth,
        timeout: Duration::from_secs(settings.ssh_connect_timeout_secs),
    };
    info!(host = %params.host, user = %params.user, "connecting over ssh");
    let executor =
        RemoteExecutor::connect(params, proxy_url, node.sudo_password.as_deref()).await?;
    Ok(Box::new(executor))
}
