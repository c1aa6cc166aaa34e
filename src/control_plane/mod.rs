//! Client for the resource manager (`/resmgr/v1`) and cluster orchestrator
//! (`/qbert/v3`) services, plus the host-agent installer download.
//!
//! Every call carries the bearer token in `X-Auth-Token`. Host authorization
//! and cluster status reads retry on 404 under a [`RetryPolicy`]; every other
//! call fails on its first non-success answer.

mod error;
mod retry;
mod types;

use std::future::Future;
use std::pin::Pin;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::http::truncate_body;
use crate::platform::OsFamily;

pub use error::ControlPlaneError;
pub use retry::{RetryPolicy, retry_on_not_found};
pub use types::{
    ClusterCreateRequest, ClusterSummary, HostExtensions, HostMatch, HostRecord,
    IpAddressExtension, NodeRole,
};
use types::{AttachEntry, CloudProvider, CreatedCluster, DetachEntry};

const AUTH_HEADER: &str = "X-Auth-Token";
const KUBE_ROLE: &str = "pf9-kube";
const LOCAL_PROVIDER: &str = "local";
const BODY_LIMIT: usize = 512;

/// Boxed future returned by [`ControlPlaneApi`] methods.
pub type ApiFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ControlPlaneError>> + Send + 'a>>;

/// Control-plane operations used by the node orchestrator.
pub trait ControlPlaneApi: Send + Sync {
    /// Maps each address in `ips` to the registered host reporting it.
    /// Addresses with no registered host are omitted.
    fn get_host_ids<'a>(&'a self, token: &'a str, ips: &'a [String]) -> ApiFuture<'a, Vec<HostMatch>>;

    /// Grants the `pf9-kube` role to a host, retrying while it is unknown.
    fn authorize_host<'a>(&'a self, host_id: &'a str, token: &'a str) -> ApiFuture<'a, ()>;

    /// Revokes the `pf9-kube` role from a host.
    fn deauthorize_node<'a>(&'a self, node_id: &'a str, token: &'a str) -> ApiFuture<'a, ()>;

    /// Reads one node from the cluster orchestrator.
    fn get_node_info<'a>(
        &'a self,
        token: &'a str,
        project_id: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, HostRecord>;

    /// Reads every node known to the cluster orchestrator.
    fn get_all_nodes<'a>(&'a self, token: &'a str, project_id: &'a str)
    -> ApiFuture<'a, Vec<HostRecord>>;

    /// Returns the ID of the cluster named `name`, if it exists.
    fn check_cluster_exists<'a>(
        &'a self,
        name: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, Option<String>>;

    /// Creates a cluster and returns its ID.
    ///
    /// Fails with [`ControlPlaneError::ClusterExists`] when the name is
    /// taken. An empty node-pool ID is resolved from the `local` cloud
    /// provider first.
    fn create_cluster<'a>(
        &'a self,
        request: &'a ClusterCreateRequest,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, String>;

    /// Attaches nodes to a cluster with the given role.
    fn attach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
        node_ids: &'a [String],
        role: NodeRole,
    ) -> ApiFuture<'a, ()>;

    /// Detaches one node from its cluster.
    fn detach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Deletes a cluster.
    fn delete_cluster<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Reads a cluster's convergence status, retrying while it is unknown.
    fn get_converge_status<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, String>;

    /// Downloads the host-agent installer script for `family`.
    fn download_installer<'a>(&'a self, token: &'a str, family: OsFamily) -> ApiFuture<'a, Vec<u8>>;
}

/// HTTP implementation of [`ControlPlaneApi`].
#[derive(Clone, Debug)]
pub struct ControlPlaneClient {
    http: Client,
    base: Url,
    retry: RetryPolicy,
}

impl ControlPlaneClient {
    /// Builds a client for the services under `base`.
    #[must_use]
    pub const fn new(http: Client, base: Url, retry: RetryPolicy) -> Self {
        Self { http, base, retry }
    }

    fn url(&self, op: &'static str, path: &str) -> Result<Url, ControlPlaneError> {
        self.base
            .join(path)
            .map_err(|err| ControlPlaneError::Decode {
                op,
                message: format!("invalid url {path}: {err}"),
            })
    }

    async fn send(
        op: &'static str,
        request: RequestBuilder,
        token: &str,
    ) -> Result<Response, ControlPlaneError> {
        let response = request
            .header(AUTH_HEADER, token)
            .send()
            .await
            .map_err(|err| ControlPlaneError::Transport {
                op,
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(op, status = status.as_u16(), "control-plane call succeeded");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ControlPlaneError::Status {
            op,
            status: status.as_u16(),
            body: truncate_body(&body, BODY_LIMIT),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        op: &'static str,
        response: Response,
    ) -> Result<T, ControlPlaneError> {
        let text = response
            .text()
            .await
            .map_err(|err| ControlPlaneError::Transport {
                op,
                message: err.to_string(),
            })?;
        serde_json::from_str(&text).map_err(|err| ControlPlaneError::Decode {
            op,
            message: err.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        token: &str,
    ) -> Result<T, ControlPlaneError> {
        let response = Self::send(op, self.http.get(self.url(op, path)?), token).await?;
        Self::read_json(op, response).await
    }

    async fn host_ids(&self, token: &str, ips: &[String]) -> Result<Vec<HostMatch>, ControlPlaneError> {
        let hosts: Vec<HostRecord> = self.get_json("GetHostId", "resmgr/v1/hosts", token).await?;
        let matches: Vec<HostMatch> = ips
            .iter()
            .filter_map(|ip| {
                hosts.iter().find(|host| host.has_ip(ip)).map(|host| HostMatch {
                    ip: ip.clone(),
                    host_id: host.uuid.clone(),
                })
            })
            .collect();
        debug!(requested = ips.len(), matched = matches.len(), "mapped addresses to hosts");
        Ok(matches)
    }

    async fn authorize(&self, host_id: &str, token: &str) -> Result<(), ControlPlaneError> {
        const OP: &str = "AuthorizeHost";
        let url = self.url(OP, &format!("resmgr/v1/hosts/{host_id}/roles/{KUBE_ROLE}"))?;
        retry_on_not_found(&self.retry, OP, || {
            let request = self.http.put(url.clone());
            async move { Self::send(OP, request, token).await.map(drop) }
        })
        .await?;
        info!(host_id, "host authorized");
        Ok(())
    }

    async fn deauthorize(&self, node_id: &str, token: &str) -> Result<(), ControlPlaneError> {
        const OP: &str = "DeauthorizeNode";
        let url = self.url(OP, &format!("resmgr/v1/hosts/{node_id}/roles/{KUBE_ROLE}"))?;
        Self::send(OP, self.http.delete(url), token).await?;
        info!(node_id, "host deauthorized");
        Ok(())
    }

    async fn cluster_id_for(
        &self,
        name: &str,
        project_id: &str,
        token: &str,
    ) -> Result<Option<String>, ControlPlaneError> {
        let clusters: Vec<ClusterSummary> = self
            .get_json(
                "CheckClusterExists",
                &format!("qbert/v3/{project_id}/clusters"),
                token,
            )
            .await?;
        Ok(clusters
            .into_iter()
            .find(|cluster| cluster.name == name)
            .map(|cluster| cluster.uuid))
    }

    async fn local_node_pool(&self, project_id: &str, token: &str) -> Result<String, ControlPlaneError> {
        let providers: Vec<CloudProvider> = self
            .get_json(
                "GetNodePool",
                &format!("qbert/v3/{project_id}/cloudProviders"),
                token,
            )
            .await?;
        providers
            .into_iter()
            .find(|provider| provider.kind == LOCAL_PROVIDER)
            .map(|provider| provider.node_pool_uuid)
            .filter(|uuid| !uuid.is_empty())
            .ok_or(ControlPlaneError::NoLocalNodePool)
    }

    async fn create(
        &self,
        request: &ClusterCreateRequest,
        project_id: &str,
        token: &str,
    ) -> Result<String, ControlPlaneError> {
        const OP: &str = "CreateCluster";
        if self.cluster_id_for(&request.name, project_id, token).await?.is_some() {
            return Err(ControlPlaneError::ClusterExists {
                name: request.name.clone(),
            });
        }

        let mut body = request.clone();
        if body.node_pool_uuid.is_empty() {
            body.node_pool_uuid = self.local_node_pool(project_id, token).await?;
        }

        let url = self.url(OP, &format!("qbert/v3/{project_id}/clusters"))?;
        let response = Self::send(OP, self.http.post(url).json(&body), token).await?;
        let created: CreatedCluster = Self::read_json(OP, response).await?;
        info!(cluster = %body.name, uuid = %created.uuid, "cluster created");
        Ok(created.uuid)
    }

    async fn attach(
        &self,
        cluster_id: &str,
        project_id: &str,
        token: &str,
        node_ids: &[String],
        role: NodeRole,
    ) -> Result<(), ControlPlaneError> {
        const OP: &str = "AttachNode";
        let entries: Vec<AttachEntry<'_>> = node_ids
            .iter()
            .map(|uuid| AttachEntry {
                uuid,
                is_master: role == NodeRole::Master,
            })
            .collect();
        let url = self.url(OP, &format!("qbert/v3/{project_id}/clusters/{cluster_id}/attach"))?;
        Self::send(OP, self.http.post(url).json(&entries), token).await?;
        info!(cluster_id, role = role.as_str(), count = node_ids.len(), "nodes attached");
        Ok(())
    }

    async fn detach(
        &self,
        cluster_id: &str,
        project_id: &str,
        token: &str,
        node_id: &str,
    ) -> Result<(), ControlPlaneError> {
        const OP: &str = "DetachNode";
        let url = self.url(OP, &format!("qbert/v3/{project_id}/clusters/{cluster_id}/detach"))?;
        Self::send(OP, self.http.post(url).json(&[DetachEntry { uuid: node_id }]), token).await?;
        info!(cluster_id, node_id, "node detached");
        Ok(())
    }

    async fn delete(&self, cluster_id: &str, project_id: &str, token: &str) -> Result<(), ControlPlaneError> {
        const OP: &str = "DeleteCluster";
        let url = self.url(OP, &format!("qbert/v3/{project_id}/clusters/{cluster_id}"))?;
        Self::send(OP, self.http.delete(url), token).await?;
        info!(cluster_id, "cluster deleted");
        Ok(())
    }

    async fn converge_status(
        &self,
        cluster_id: &str,
        project_id: &str,
        token: &str,
    ) -> Result<String, ControlPlaneError> {
        const OP: &str = "GetConvergeStatus";
        let url = self.url(OP, &format!("qbert/v3/{project_id}/clusters/{cluster_id}"))?;
        let cluster: ClusterSummary = retry_on_not_found(&self.retry, OP, || {
            let request = self.http.get(url.clone());
            async move {
                let response = Self::send(OP, request, token).await?;
                Self::read_json(OP, response).await
            }
        })
        .await?;
        Ok(cluster.status)
    }

    async fn installer(&self, token: &str, family: OsFamily) -> Result<Vec<u8>, ControlPlaneError> {
        const OP: &str = "DownloadInstaller";
        let url = self.url(
            OP,
            &format!("clarity/platform9-install-{}.sh", family.installer_flavour()),
        )?;
        let response = Self::send(OP, self.http.get(url), token).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ControlPlaneError::Transport {
                op: OP,
                message: err.to_string(),
            })?;
        info!(family = family.installer_flavour(), bytes = bytes.len(), "installer downloaded");
        Ok(bytes.to_vec())
    }
}

impl ControlPlaneApi for ControlPlaneClient {
    fn get_host_ids<'a>(&'a self, token: &'a str, ips: &'a [String]) -> ApiFuture<'a, Vec<HostMatch>> {
        Box::pin(self.host_ids(token, ips))
    }

    fn authorize_host<'a>(&'a self, host_id: &'a str, token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.authorize(host_id, token))
    }

    fn deauthorize_node<'a>(&'a self, node_id: &'a str, token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.deauthorize(node_id, token))
    }

    fn get_node_info<'a>(
        &'a self,
        token: &'a str,
        project_id: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, HostRecord> {
        Box::pin(async move {
            self.get_json(
                "GetNodeInfo",
                &format!("qbert/v3/{project_id}/nodes/{node_id}"),
                token,
            )
            .await
        })
    }

    fn get_all_nodes<'a>(
        &'a self,
        token: &'a str,
        project_id: &'a str,
    ) -> ApiFuture<'a, Vec<HostRecord>> {
        Box::pin(async move {
            self.get_json("GetAllNodes", &format!("qbert/v3/{project_id}/nodes"), token)
                .await
        })
    }

    fn check_cluster_exists<'a>(
        &'a self,
        name: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, Option<String>> {
        Box::pin(self.cluster_id_for(name, project_id, token))
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a ClusterCreateRequest,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, String> {
        Box::pin(self.create(request, project_id, token))
    }

    fn attach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
        node_ids: &'a [String],
        role: NodeRole,
    ) -> ApiFuture<'a, ()> {
        Box::pin(self.attach(cluster_id, project_id, token, node_ids, role))
    }

    fn detach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(self.detach(cluster_id, project_id, token, node_id))
    }

    fn delete_cluster<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, ()> {
        Box::pin(self.delete(cluster_id, project_id, token))
    }

    fn get_converge_status<'a>(
        &'a self,
        cluster_id: &'a str,
        project_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, String> {
        Box::pin(self.converge_status(cluster_id, project_id, token))
    }

    fn download_installer<'a>(&'a self, token: &'a str, family: OsFamily) -> ApiFuture<'a, Vec<u8>> {
        Box::pin(self.installer(token, family))
    }
}
