//! Node pipelines: preparing, checking, authorizing and retiring nodes.
//!
//! A [`NodeOrchestrator`] holds everything one command needs besides the
//! executor: the control-plane client, the token and project scope, timing
//! settings and the event sink. Each pipeline receives the executor for its
//! host, so pipelines for different hosts can run side by side on one
//! orchestrator while each host's stages stay strictly ordered.

mod cluster;
mod hostagent;
mod multi;
mod node;
mod proxy;
mod stage;

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{RuntimeSettings, Session};
use crate::control_plane::ControlPlaneApi;
use crate::error::Pf9Error;
use crate::executor::Executor;
use crate::platform::{PrereqCheck, detect_os, hard_failures, run_checks};
use crate::telemetry::{Event, EventOutcome, EventSink};

pub use cluster::{ClusterRef, CreatedCluster};
pub use hostagent::{HOST_ID_CONF, INSTALL_LOG, parse_host_id};
pub use multi::{HostReport, HostStatus, exit_code_for, run_per_host};
pub use node::DeauthorizeOutcome;
pub use proxy::ProxySpec;
pub use stage::Stage;

/// Per-command scope and timing shared by every pipeline.
#[derive(Clone, Debug)]
pub struct OrchestratorContext {
    /// Bearer token for control-plane calls.
    pub token: String,
    /// Project the token is scoped to.
    pub project_id: String,
    /// Tenant name passed to the host-agent installer.
    pub tenant: String,
    /// Control-plane host the host agent registers with.
    pub controller: String,
    /// Proxy for node commands and the installer.
    pub proxy_url: Option<String>,
    /// Wait between installer exit and reading the host ID.
    pub settle: Duration,
    /// Wait after decommissioning for ports to close.
    pub decommission_wait: Duration,
    /// Upper bound on waiting for a new cluster to converge.
    pub converge_timeout: Duration,
    /// Interval between convergence polls.
    pub converge_poll: Duration,
    /// Local directory caching downloaded installers.
    pub work_dir: Utf8PathBuf,
}

impl OrchestratorContext {
    /// Builds a context from a validated session and runtime settings.
    #[must_use]
    pub fn from_session(session: &Session, settings: &RuntimeSettings, work_dir: Utf8PathBuf) -> Self {
        Self {
            token: session.token.token.clone(),
            project_id: session.token.project_id.clone(),
            tenant: session.config.tenant.clone(),
            controller: session.endpoint.host_str().unwrap_or_default().to_owned(),
            proxy_url: session.config.proxy().map(str::to_owned),
            settle: Duration::from_secs(settings.host_agent_settle_secs),
            decommission_wait: Duration::from_secs(settings.decommission_wait_secs),
            converge_timeout: Duration::from_secs(settings.converge_timeout_secs),
            converge_poll: Duration::from_secs(settings.converge_poll_secs),
            work_dir,
        }
    }
}

/// Result of a successful `prep-node` run on one host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrepOutcome {
    /// Host ID the node registered with.
    pub host_id: String,
    /// `true` when the node was already prepared and only authorized.
    pub already_prepped: bool,
    /// Prerequisite results; empty when the checks were skipped.
    pub checks: Vec<PrereqCheck>,
}

/// Runs node pipelines against one control plane.
pub struct NodeOrchestrator<C> {
    api: C,
    ctx: OrchestratorContext,
    events: Arc<dyn EventSink>,
    installer_lock: Mutex<()>,
}

impl<C: ControlPlaneApi> NodeOrchestrator<C> {
    /// Builds an orchestrator over `api`.
    #[must_use]
    pub fn new(api: C, ctx: OrchestratorContext, events: Arc<dyn EventSink>) -> Self {
        Self {
            api,
            ctx,
            events,
            installer_lock: Mutex::new(()),
        }
    }

    /// The control-plane client.
    #[must_use]
    pub const fn api(&self) -> &C {
        &self.api
    }

    /// The per-command context.
    #[must_use]
    pub const fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    fn emit(&self, name: &'static str, host: &str, outcome: EventOutcome, detail: impl Into<String>) {
        self.events
            .emit(&Event::new(name, host, outcome).with_detail(detail));
    }

    fn finish<T>(&self, name: &'static str, host: &str, result: &Result<T, Pf9Error>) {
        match result {
            Ok(_) => self.emit(name, host, EventOutcome::Succeeded, ""),
            Err(err) => {
                warn!(host, event = name, error = %err, "pipeline failed");
                self.emit(name, host, EventOutcome::Failed, err.to_string());
            }
        }
    }

    /// Prepares the host behind `executor` and authorizes it.
    ///
    /// A host whose `/etc/pf9/host_id.conf` already exists skips the checks
    /// and the installer and is only authorized, so re-running is safe.
    ///
    /// # Errors
    ///
    /// Returns [`Pf9Error::UnsupportedOs`], [`Pf9Error::PrereqFailed`] with
    /// every check result, executor failures labelled with their stage,
    /// [`Pf9Error::HostIdMissing`] or the authorization failure.
    pub async fn prep_node(&self, executor: &dyn Executor) -> Result<PrepOutcome, Pf9Error> {
        let host = executor.target();
        self.emit("Prep-node", host, EventOutcome::Started, "");
        let result = self.prep_stages(executor).await;
        self.finish("Prep-node", host, &result);
        result
    }

    async fn prep_stages(&self, executor: &dyn Executor) -> Result<PrepOutcome, Pf9Error> {
        let host = executor.target();
        let os = detect_os(executor)
            .await
            .map_err(|err| Pf9Error::probe(Stage::DetectOs, err))?;

        if let Some(host_id) = self.existing_host_id(executor).await? {
            info!(host, %host_id, "node already prepared; authorizing");
            self.authorize(host, &host_id).await?;
            return Ok(PrepOutcome {
                host_id,
                already_prepped: true,
                checks: Vec::new(),
            });
        }

        let checks = run_checks(executor, os.family).await;
        if !hard_failures(&checks).is_empty() {
            return Err(Pf9Error::PrereqFailed { checks });
        }

        self.install_host_agent(executor, os.family).await?;
        info!(host, settle_secs = self.ctx.settle.as_secs(), "waiting for host agent to register");
        tokio::time::sleep(self.ctx.settle).await;

        let host_id = self.read_host_id(executor).await?;
        self.authorize(host, &host_id).await?;
        Ok(PrepOutcome {
            host_id,
            already_prepped: false,
            checks,
        })
    }

    /// Runs the prerequisite battery on the host behind `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`Pf9Error::PrereqFailed`] carrying every result when a fatal
    /// check fails, or the OS detection failure.
    pub async fn check_node(&self, executor: &dyn Executor) -> Result<Vec<PrereqCheck>, Pf9Error> {
        let host = executor.target();
        self.emit("Check-node", host, EventOutcome::Started, "");
        let result = async {
            let os = detect_os(executor)
                .await
                .map_err(|err| Pf9Error::probe(Stage::DetectOs, err))?;
            let checks = run_checks(executor, os.family).await;
            if hard_failures(&checks).is_empty() {
                Ok(checks)
            } else {
                Err(Pf9Error::PrereqFailed { checks })
            }
        }
        .await;
        self.finish("Check-node", host, &result);
        result
    }

    /// Authorizes the node behind `executor` using its local host ID.
    ///
    /// # Errors
    ///
    /// Returns [`Pf9Error::HostIdMissing`] when the node was never prepared,
    /// or the authorization failure.
    pub async fn authorize_node(&self, executor: &dyn Executor) -> Result<String, Pf9Error> {
        let host = executor.target();
        let result = async {
            let host_id = self.read_host_id(executor).await?;
            self.authorize(host, &host_id).await?;
            Ok(host_id)
        }
        .await;
        self.finish("Authorize-node", host, &result);
        result
    }

    async fn authorize(&self, host: &str, host_id: &str) -> Result<(), Pf9Error> {
        self.api
            .authorize_host(host_id, &self.ctx.token)
            .await
            .map_err(Pf9Error::from)?;
        info!(host, host_id, "node authorized");
        Ok(())
    }
}
