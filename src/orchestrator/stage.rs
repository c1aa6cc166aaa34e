//! Named stages of the node pipelines.

use std::fmt;

/// A step of a node pipeline, used to label failures and events.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// Loading and validating the operator configuration.
    LoadConfig,
    /// Building the executor for a host.
    BuildExecutor,
    /// Reading `/etc/os-release`.
    DetectOs,
    /// Running the prerequisite battery.
    RunPrereqChecks,
    /// Downloading, staging and running the host-agent installer.
    InstallHostAgent,
    /// Reading `/etc/pf9/host_id.conf`.
    ReadLocalHostId,
    /// Granting the `pf9-kube` role.
    Authorize,
    /// Revoking the `pf9-kube` role.
    Deauthorize,
    /// Detaching nodes from their cluster.
    Detach,
    /// Attaching nodes to a cluster.
    Attach,
    /// Creating a cluster and waiting for it to converge.
    CreateCluster,
    /// Deleting a cluster.
    DeleteCluster,
    /// Removing platform packages and state from a node.
    Decommission,
    /// Writing the comms proxy configuration.
    SetProxy,
}

impl Stage {
    /// Stage name as shown in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadConfig => "LoadConfig",
            Self::BuildExecutor => "BuildExecutor",
            Self::DetectOs => "DetectOS",
            Self::RunPrereqChecks => "RunPrereqChecks",
            Self::InstallHostAgent => "InstallHostAgent",
            Self::ReadLocalHostId => "ReadLocalHostId",
            Self::Authorize => "Authorize",
            Self::Deauthorize => "Deauthorize",
            Self::Detach => "Detach",
            Self::Attach => "Attach",
            Self::CreateCluster => "CreateCluster",
            Self::DeleteCluster => "DeleteCluster",
            Self::Decommission => "Decommission",
            Self::SetProxy => "SetProxy",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
