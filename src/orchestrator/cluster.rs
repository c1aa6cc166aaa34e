//! Cluster creation, attachment and deletion.

use std::fmt;

use tokio::time::Instant;
use tracing::{debug, info};

use super::node::kill_processes;
use super::{HostReport, HostStatus, NodeOrchestrator, Stage};
use crate::control_plane::{ClusterCreateRequest, ControlPlaneApi, HostRecord, NodeRole};
use crate::error::Pf9Error;
use crate::executor::Executor;
use crate::telemetry::EventOutcome;

const CONVERGED: &str = "ok";
const CONVERGE_FAILURES: [&str; 2] = ["failed", "error"];
const CLUSTER_PROCESSES: [&str; 3] = ["kubelet", "etcd", "kube-proxy"];

/// A cluster named by the operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClusterRef {
    /// Looked up with `CheckClusterExists`.
    Name(String),
    /// Used as given.
    Uuid(String),
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Uuid(uuid) => f.write_str(uuid),
        }
    }
}

/// Result of `cluster create`.
#[derive(Debug)]
pub struct CreatedCluster {
    /// ID of the new cluster.
    pub uuid: String,
    /// Per-node attach results.
    pub attached: Vec<HostReport>,
}

impl<C: ControlPlaneApi> NodeOrchestrator<C> {
    async fn resolve_cluster(&self, cluster: &ClusterRef) -> Result<String, Pf9Error> {
        match cluster {
            ClusterRef::Uuid(uuid) => Ok(uuid.clone()),
            ClusterRef::Name(name) => self
                .api
                .check_cluster_exists(name, &self.ctx.project_id, &self.ctx.token)
                .await?
                .ok_or_else(|| Pf9Error::ClusterNotFound { name: name.clone() }),
        }
    }

    /// Attaches `masters` and `workers` to `cluster`.
    ///
    /// Addresses with no registered host, and nodes already in a cluster,
    /// are reported as skipped. Masters are attached before workers.
    ///
    /// # Errors
    ///
    /// Returns [`Pf9Error::ClusterNotFound`] or the first control-plane
    /// failure.
    pub async fn attach_nodes(
        &self,
        cluster: &ClusterRef,
        masters: &[String],
        workers: &[String],
    ) -> Result<Vec<HostReport>, Pf9Error> {
        let uuid = self.resolve_cluster(cluster).await?;
        let nodes = self
            .api
            .get_all_nodes(&self.ctx.token, &self.ctx.project_id)
            .await?;
        let mut reports = Vec::with_capacity(masters.len() + workers.len());
        for (role, ips) in [(NodeRole::Master, masters), (NodeRole::Worker, workers)] {
            if ips.is_empty() {
                continue;
            }
            reports.extend(self.attach_role(&uuid, role, ips, &nodes).await?);
        }
        Ok(reports)
    }

    async fn attach_role(
        &self,
        cluster_uuid: &str,
        role: NodeRole,
        ips: &[String],
        nodes: &[HostRecord],
    ) -> Result<Vec<HostReport>, Pf9Error> {
        let matches = self.api.get_host_ids(&self.ctx.token, ips).await?;
        let mut reports = Vec::with_capacity(ips.len());
        let mut pending = Vec::new();
        for ip in ips {
            let Some(found) = matches.iter().find(|found| &found.ip == ip) else {
                reports.push(HostReport::new(
                    ip,
                    HostStatus::Skipped(String::from("not registered with the control plane")),
                ));
                continue;
            };
            let current = nodes.iter().find(|node| node.uuid == found.host_id);
            if let Some(node) = current.filter(|node| node.is_attached()) {
                reports.push(HostReport::new(
                    ip,
                    HostStatus::Skipped(format!("already attached to cluster {}", node.cluster_uuid)),
                ));
                continue;
            }
            pending.push((ip, found.host_id.clone()));
        }
        if pending.is_empty() {
            return Ok(reports);
        }

        let ids: Vec<String> = pending.iter().map(|(_, id)| id.clone()).collect();
        self.api
            .attach_node(cluster_uuid, &self.ctx.project_id, &self.ctx.token, &ids, role)
            .await?;
        info!(cluster = cluster_uuid, role = role.as_str(), count = ids.len(), "nodes attached");
        reports.extend(pending.into_iter().map(|(ip, _)| {
            HostReport::new(
                ip,
                HostStatus::Succeeded(format!("attached as {}", role.as_str())),
            )
        }));
        Ok(reports)
    }

    /// Creates a cluster, attaches the given nodes and, when a master was
    /// attached, waits for the cluster to converge.
    ///
    /// # Errors
    ///
    /// Returns the creation failure (including an existing name), attach
    /// failures, or [`Pf9Error::ClusterNotConverged`].
    pub async fn create_cluster(
        &self,
        request: &ClusterCreateRequest,
        masters: &[String],
        workers: &[String],
    ) -> Result<CreatedCluster, Pf9Error> {
        self.emit("Create-cluster", &request.name, EventOutcome::Started, "");
        let result = async {
            let uuid = self
                .api
                .create_cluster(request, &self.ctx.project_id, &self.ctx.token)
                .await?;
            info!(cluster = %uuid, name = %request.name, "cluster created");
            let attached = self
                .attach_nodes(&ClusterRef::Uuid(uuid.clone()), masters, workers)
                .await?;
            let any_master = attached.iter().any(|report| {
                matches!(report.status, HostStatus::Succeeded(_)) && masters.contains(&report.host)
            });
            if any_master {
                self.wait_for_convergence(&uuid).await?;
            }
            Ok(CreatedCluster { uuid, attached })
        }
        .await;
        self.finish("Create-cluster", &request.name, &result);
        result
    }

    async fn wait_for_convergence(&self, uuid: &str) -> Result<(), Pf9Error> {
        let deadline = Instant::now() + self.ctx.converge_timeout;
        loop {
            let status = self
                .api
                .get_converge_status(uuid, &self.ctx.project_id, &self.ctx.token)
                .await?;
            debug!(cluster = uuid, %status, "convergence status");
            if status == CONVERGED {
                info!(cluster = uuid, "cluster converged");
                return Ok(());
            }
            if CONVERGE_FAILURES.contains(&status.as_str()) || Instant::now() >= deadline {
                return Err(Pf9Error::ClusterNotConverged {
                    cluster: uuid.to_owned(),
                    status,
                });
            }
            tokio::time::sleep(self.ctx.converge_poll).await;
        }
    }

    /// Deletes `cluster`.
    ///
    /// When the host behind `executor` belongs to the cluster, its
    /// `kubelet`, `etcd` and `kube-proxy` processes are killed first so
    /// their ports are free for a later `prep-node`.
    ///
    /// # Errors
    ///
    /// Returns [`Pf9Error::ClusterNotFound`], command failures or the
    /// delete failure.
    pub async fn delete_cluster(
        &self,
        executor: &dyn Executor,
        cluster: &ClusterRef,
    ) -> Result<String, Pf9Error> {
        let label = cluster.to_string();
        self.emit("Delete-cluster", &label, EventOutcome::Started, "");
        let result = async {
            let uuid = self.resolve_cluster(cluster).await?;
            if self.local_host_in_cluster(executor, &uuid).await? {
                info!(host = executor.target(), cluster = %uuid, "stopping local cluster processes");
                kill_processes(executor, &CLUSTER_PROCESSES, Stage::DeleteCluster).await?;
            }
            self.api
                .delete_cluster(&uuid, &self.ctx.project_id, &self.ctx.token)
                .await?;
            info!(cluster = %uuid, "cluster deleted");
            Ok(uuid)
        }
        .await;
        self.finish("Delete-cluster", &label, &result);
        result
    }

    async fn local_host_in_cluster(
        &self,
        executor: &dyn Executor,
        cluster_uuid: &str,
    ) -> Result<bool, Pf9Error> {
        let Some(host_id) = self.existing_host_id(executor).await? else {
            return Ok(false);
        };
        match self
            .api
            .get_node_info(&self.ctx.token, &self.ctx.project_id, &host_id)
            .await
        {
            Ok(node) => Ok(node.cluster_uuid == cluster_uuid),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
