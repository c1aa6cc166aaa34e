//! Deauthorizing, detaching and decommissioning nodes.

use tracing::{info, warn};

use super::{HostReport, HostStatus, NodeOrchestrator, Stage};
use crate::config::Prompter;
use crate::control_plane::ControlPlaneApi;
use crate::error::Pf9Error;
use crate::executor::{Executor, ExecutorError};
use crate::platform::{OsFamily, detect_os, installed_packages};
use crate::telemetry::EventOutcome;

const DEAUTHORIZE_PROMPT: &str = "Do you still want to deauthorize it?";
const REMOVE_DATA_DIRS: [&str; 3] = ["-rf", "/etc/pf9", "/var/opt/pf9"];
const USER_DATA_DIR: &str = r#"rm -rf "$(getent passwd "${SUDO_USER:-root}" | cut -d: -f6)/pf9""#;
const LINGERING_PROCESSES: [&str; 5] = [
    "kubelet",
    "kube-proxy",
    "kube-apiserver",
    "kube-scheduler",
    "kube-controller",
];

/// How a deauthorize or decommission request ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeauthorizeOutcome {
    /// The `pf9-kube` role was revoked.
    Deauthorized {
        /// Host that lost the role.
        host_id: String,
    },
    /// The operator declined the confirmation prompt; nothing was changed.
    Declined {
        /// Host that was left untouched.
        host_id: String,
    },
    /// The node never registered, so there was nothing to revoke.
    Unregistered,
}

/// Kills every process named in `names`; "no process matched" is fine.
pub(super) async fn kill_processes(
    executor: &dyn Executor,
    names: &[&str],
    stage: Stage,
) -> Result<(), Pf9Error> {
    for name in names {
        match executor.run("pkill", &["-9", name]).await {
            Ok(()) => info!(host = executor.target(), process = name, "killed"),
            Err(err) if err.exited_with(1) => {}
            Err(err) => return Err(Pf9Error::executor(stage, err)),
        }
    }
    Ok(())
}

impl<C: ControlPlaneApi> NodeOrchestrator<C> {
    /// Reason to confirm before deauthorizing `host_id`, if any.
    ///
    /// A master node, or the last node of its cluster, needs confirmation. A
    /// node unknown to the cluster service needs none.
    async fn deauthorize_risk(&self, host_id: &str) -> Result<Option<String>, Pf9Error> {
        let node = match self
            .api
            .get_node_info(&self.ctx.token, &self.ctx.project_id, host_id)
            .await
        {
            Ok(node) => node,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if node.is_master() {
            return Ok(Some(format!(
                "node {} is a master of cluster {}",
                node.name, node.cluster_uuid
            )));
        }
        if !node.is_attached() {
            return Ok(None);
        }
        let members = self
            .api
            .get_all_nodes(&self.ctx.token, &self.ctx.project_id)
            .await?
            .into_iter()
            .filter(|other| other.cluster_uuid == node.cluster_uuid)
            .count();
        Ok((members <= 1).then(|| {
            format!(
                "node {} is the last node in cluster {}",
                node.name, node.cluster_uuid
            )
        }))
    }

    /// Asks for confirmation when deauthorizing `host_id` is risky.
    /// Without a prompter the answer is always yes.
    async fn confirm_deauthorize(
        &self,
        host_id: &str,
        prompter: Option<&dyn Prompter>,
    ) -> Result<bool, Pf9Error> {
        let Some(terminal) = prompter else {
            return Ok(true);
        };
        let Some(reason) = self.deauthorize_risk(host_id).await? else {
            return Ok(true);
        };
        warn!(host_id, %reason, "deauthorizing may disrupt the cluster");
        terminal
            .confirm(&format!("{reason}. {DEAUTHORIZE_PROMPT}"), false)
            .map_err(|err| Pf9Error::Config {
                message: err.to_string(),
            })
    }

    async fn resolve_host_id(&self, ip: &str) -> Result<String, Pf9Error> {
        let ips = [ip.to_owned()];
        self.api
            .get_host_ids(&self.ctx.token, &ips)
            .await?
            .into_iter()
            .next()
            .map(|found| found.host_id)
            .ok_or_else(|| Pf9Error::ControlPlaneFailed {
                op: "GetHostId",
                status: None,
                body: format!("no registered host reports {ip}"),
            })
    }

    /// Revokes the `pf9-kube` role from a node.
    ///
    /// With `ip` the node is looked up by address; otherwise its ID is read
    /// from `host_id.conf` through `executor`. When `prompter` is given and
    /// the node is a master or the last node of its cluster, the operator
    /// must confirm first.
    ///
    /// # Errors
    ///
    /// Returns lookup, prompt or control-plane failures.
    pub async fn deauthorize_node(
        &self,
        executor: &dyn Executor,
        ip: Option<&str>,
        prompter: Option<&dyn Prompter>,
    ) -> Result<DeauthorizeOutcome, Pf9Error> {
        let host = ip.unwrap_or_else(|| executor.target());
        self.emit("Deauthorize-node", host, EventOutcome::Started, "");
        let result = async {
            let host_id = match ip {
                Some(address) => self.resolve_host_id(address).await?,
                None => self.read_host_id(executor).await?,
            };
            if !self.confirm_deauthorize(&host_id, prompter).await? {
                info!(host, %host_id, "deauthorization declined");
                return Ok(DeauthorizeOutcome::Declined { host_id });
            }
            self.deauthorize(host, &host_id).await?;
            Ok(DeauthorizeOutcome::Deauthorized { host_id })
        }
        .await;
        self.finish("Deauthorize-node", host, &result);
        result
    }

    async fn deauthorize(&self, host: &str, host_id: &str) -> Result<(), Pf9Error> {
        self.api.deauthorize_node(host_id, &self.ctx.token).await?;
        info!(host, host_id, "node deauthorized");
        Ok(())
    }

    /// Detaches every node in `ips` from its cluster.
    ///
    /// Unregistered or unattached nodes are reported as skipped; one node's
    /// failure does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns the failure of the initial host lookup.
    pub async fn detach_nodes(&self, ips: &[String]) -> Result<Vec<HostReport>, Pf9Error> {
        let matches = self.api.get_host_ids(&self.ctx.token, ips).await?;
        let mut reports = Vec::with_capacity(ips.len());
        for ip in ips {
            let status = match matches.iter().find(|found| &found.ip == ip) {
                None => HostStatus::Skipped(String::from("not registered with the control plane")),
                Some(found) => self.detach_one(&found.host_id).await,
            };
            reports.push(HostReport::new(ip, status));
        }
        Ok(reports)
    }

    async fn detach_one(&self, host_id: &str) -> HostStatus {
        let node = match self
            .api
            .get_node_info(&self.ctx.token, &self.ctx.project_id, host_id)
            .await
        {
            Ok(node) => node,
            Err(err) if err.is_not_found() => {
                return HostStatus::Skipped(String::from("not known to the cluster service"));
            }
            Err(err) => return HostStatus::Failed(err.into()),
        };
        if !node.is_attached() {
            return HostStatus::Skipped(String::from("not attached to any cluster"));
        }
        match self
            .api
            .detach_node(&node.cluster_uuid, &self.ctx.project_id, &self.ctx.token, host_id)
            .await
        {
            Ok(()) => {
                info!(host_id, cluster = %node.cluster_uuid, "node detached");
                HostStatus::Succeeded(format!("detached from cluster {}", node.cluster_uuid))
            }
            Err(err) => HostStatus::Failed(err.into()),
        }
    }

    /// Removes every platform package and data directory from the node,
    /// kills lingering Kubernetes processes and deauthorizes it.
    ///
    /// The confirmation guard of [`Self::deauthorize_node`] applies before
    /// anything is removed.
    ///
    /// # Errors
    ///
    /// Returns OS detection, command, prompt or control-plane failures.
    pub async fn decommission(
        &self,
        executor: &dyn Executor,
        prompter: Option<&dyn Prompter>,
    ) -> Result<DeauthorizeOutcome, Pf9Error> {
        let host = executor.target();
        self.emit("Decommission-node", host, EventOutcome::Started, "");
        let result = self.decommission_stages(executor, prompter).await;
        self.finish("Decommission-node", host, &result);
        result
    }

    async fn decommission_stages(
        &self,
        executor: &dyn Executor,
        prompter: Option<&dyn Prompter>,
    ) -> Result<DeauthorizeOutcome, Pf9Error> {
        let host = executor.target();
        let os = detect_os(executor)
            .await
            .map_err(|err| Pf9Error::probe(Stage::DetectOs, err))?;
        let registered = self.existing_host_id(executor).await?;
        if let Some(id) = &registered
            && !self.confirm_deauthorize(id, prompter).await?
        {
            return Ok(DeauthorizeOutcome::Declined { host_id: id.clone() });
        }

        let stage_err = |err: ExecutorError| Pf9Error::executor(Stage::Decommission, err);
        let packages = installed_packages(executor, os.family)
            .await
            .map_err(stage_err)?;
        if !packages.is_empty() {
            info!(host, count = packages.len(), "removing platform packages");
            remove_packages(executor, os.family, &packages)
                .await
                .map_err(stage_err)?;
        }

        executor.run("rm", &REMOVE_DATA_DIRS).await.map_err(stage_err)?;
        executor.run("bash", &["-c", USER_DATA_DIR]).await.map_err(stage_err)?;
        kill_processes(executor, &LINGERING_PROCESSES, Stage::Decommission).await?;

        let Some(host_id) = registered else {
            info!(host, "node was never registered; nothing to deauthorize");
            return Ok(DeauthorizeOutcome::Unregistered);
        };
        self.deauthorize(host, &host_id).await?;
        info!(
            host,
            wait_secs = self.ctx.decommission_wait.as_secs(),
            "waiting for ports to close"
        );
        tokio::time::sleep(self.ctx.decommission_wait).await;
        Ok(DeauthorizeOutcome::Deauthorized { host_id })
    }
}

async fn remove_packages(
    executor: &dyn Executor,
    family: OsFamily,
    packages: &[String],
) -> Result<(), ExecutorError> {
    let names: Vec<&str> = packages.iter().map(String::as_str).collect();
    match family {
        OsFamily::Debian => {
            for action in ["--remove", "--purge"] {
                let mut args = vec![action];
                args.extend(&names);
                executor.run("dpkg", &args).await?;
            }
        }
        OsFamily::Rhel => {
            let mut args = vec!["erase", "-y"];
            args.extend(&names);
            executor.run("yum", &args).await?;
        }
    }
    Ok(())
}
