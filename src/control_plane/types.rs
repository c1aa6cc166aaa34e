//! Wire types for the resource manager and cluster orchestrator.

use serde::{Deserialize, Serialize};

/// Addresses reported by a host's `ip_address` extension.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct IpAddressExtension {
    /// Every address the host agent saw on the node.
    #[serde(default)]
    pub data: Vec<String>,
}

/// Extensions reported by a host agent.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct HostExtensions {
    /// Address list, absent until the agent reports it.
    #[serde(default)]
    pub ip_address: IpAddressExtension,
}

/// A host as seen by the resource manager or the cluster orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Host ID.
    #[serde(alias = "id")]
    pub uuid: String,
    /// Node name.
    #[serde(default)]
    pub name: String,
    /// Address the orchestrator uses for the node.
    #[serde(default)]
    pub primary_ip: String,
    /// Cluster the node belongs to; empty when unattached.
    #[serde(default)]
    pub cluster_uuid: String,
    /// `1` for a control-plane node, `0` otherwise.
    #[serde(default)]
    pub is_master: u8,
    /// Agent-reported extensions.
    #[serde(default)]
    pub extensions: HostExtensions,
}

impl HostRecord {
    /// Returns `true` when the node runs the cluster control plane.
    #[must_use]
    pub const fn is_master(&self) -> bool {
        self.is_master == 1
    }

    /// Returns `true` when the node belongs to a cluster.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.cluster_uuid.trim().is_empty()
    }

    /// Returns `true` when `ip` is one of the host's addresses.
    #[must_use]
    pub fn has_ip(&self, ip: &str) -> bool {
        self.primary_ip == ip || self.extensions.ip_address.data.iter().any(|addr| addr == ip)
    }
}

/// Pairing of a target address with the host registered for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostMatch {
    /// Address the operator named.
    pub ip: String,
    /// Host ID registered with that address.
    pub host_id: String,
}

/// Summary of a cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ClusterSummary {
    /// Cluster ID.
    pub uuid: String,
    /// Cluster name.
    #[serde(default)]
    pub name: String,
    /// Convergence status, for example `pending` or `ok`.
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CloudProvider {
    #[serde(default, rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) node_pool_uuid: String,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CreatedCluster {
    pub(crate) uuid: String,
}

/// Role of a node within a cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeRole {
    /// Control-plane node.
    Master,
    /// Worker node.
    Worker,
}

impl NodeRole {
    /// Lower-case role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttachEntry<'a> {
    pub(crate) uuid: &'a str,
    pub(crate) is_master: bool,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct DetachEntry<'a> {
    pub(crate) uuid: &'a str,
}

/// Body of a cluster-create call.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCreateRequest {
    /// Cluster name.
    pub name: String,
    /// Pod network CIDR.
    pub containers_cidr: String,
    /// Service network CIDR.
    pub services_cidr: String,
    /// Virtual IP fronting the API servers.
    #[serde(rename = "masterVipIpv4", skip_serializing_if = "String::is_empty")]
    pub master_vip: String,
    /// Interface carrying the virtual IP.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub master_vip_iface: String,
    /// MetalLB address pool.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub metallb_cidr: String,
    /// CNI plugin, for example `calico`.
    pub network_plugin: String,
    /// Allows privileged containers.
    pub privileged: bool,
    /// Schedules workloads on master nodes.
    pub allow_workloads_on_master: bool,
    /// Deploys the application catalog.
    pub app_catalog_enabled: bool,
    /// Node pool of the `local` cloud provider; resolved before creation.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_pool_uuid: String,
}
