//! Command-line interface definitions for the `pf9ctl` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! depends on nothing but `clap`.

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};

/// Top-level CLI for the `pf9ctl` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pf9ctl",
    about = "Prepare nodes and manage clusters on a Platform9 control plane",
    version,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Show debug logs on the console as well as in the log file.
    #[arg(long, global = true)]
    pub(crate) verbose: bool,
    /// Never prompt; fail when configuration or credentials are incomplete.
    #[arg(long, global = true)]
    pub(crate) no_prompt: bool,
    /// Command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Install the host agent on nodes and authorize them.
    #[command(name = "prep-node")]
    PrepNode(NodeArgs),
    /// Run the prerequisite checks on nodes.
    #[command(name = "check-node")]
    CheckNode(NodeArgs),
    /// Authorize the local node.
    #[command(name = "authorize-node")]
    AuthorizeNode(NodeArgs),
    /// Revoke the Kubernetes role from a node.
    #[command(name = "deauthorize-node")]
    DeauthorizeNode(DeauthorizeArgs),
    /// Node maintenance.
    #[command(subcommand)]
    Node(NodeCommand),
    /// Cluster management.
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Route the node's comms service through a proxy.
    #[command(name = "set-proxy")]
    SetProxy(SetProxyArgs),
    /// Manage the stored control-plane credentials.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Credentials for reaching the target nodes.
#[derive(Debug, Default, Args)]
pub(crate) struct NodeArgs {
    /// Target node addresses; the local host when omitted.
    #[arg(short = 'i', long = "ips", value_name = "IP", value_delimiter = ',')]
    pub(crate) ips: Vec<String>,
    /// SSH user for remote nodes.
    #[arg(short = 'u', long = "user", value_name = "USER")]
    pub(crate) user: Option<String>,
    /// SSH password for remote nodes.
    #[arg(short = 'p', long = "password", value_name = "PASSWORD", conflicts_with = "ssh_key")]
    pub(crate) password: Option<String>,
    /// SSH private key for remote nodes.
    #[arg(short = 's', long = "ssh-key", value_name = "PATH")]
    pub(crate) ssh_key: Option<String>,
    /// Password for `sudo` on the nodes.
    #[arg(short = 'e', long = "sudo-password", value_name = "PASSWORD")]
    pub(crate) sudo_password: Option<String>,
    /// One-time MFA passcode for the control plane.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}

/// Arguments for `pf9ctl deauthorize-node`.
#[derive(Debug, Args)]
pub(crate) struct DeauthorizeArgs {
    /// Address of a registered node; the local node when omitted.
    #[arg(long, value_name = "IP")]
    pub(crate) ip: Option<String>,
    /// Node credentials.
    #[command(flatten)]
    pub(crate) node: NodeArgs,
}

/// `pf9ctl node` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum NodeCommand {
    /// Detach nodes from their clusters.
    Detach(DetachArgs),
    /// Remove platform packages and data from a node and deauthorize it.
    Decommission(NodeArgs),
}

/// Arguments for `pf9ctl node detach`.
#[derive(Debug, Args)]
pub(crate) struct DetachArgs {
    /// Addresses of the nodes to detach.
    #[arg(long = "node-ip", value_name = "IP", value_delimiter = ',', required = true)]
    pub(crate) node_ips: Vec<String>,
    /// One-time MFA passcode for the control plane.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}

/// `pf9ctl cluster` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ClusterCommand {
    /// Create a cluster and attach nodes to it.
    Create(CreateClusterArgs),
    /// Attach nodes to an existing cluster.
    #[command(name = "attach-node")]
    AttachNode(AttachArgs),
    /// Delete a cluster.
    #[command(name = "delete-cluster")]
    DeleteCluster(DeleteClusterArgs),
}

/// Names a cluster by name or by ID.
#[derive(Debug, Args)]
#[command(group(ArgGroup::new("cluster").required(true).args(["name", "uuid"])))]
pub(crate) struct ClusterTarget {
    /// Cluster name.
    #[arg(short = 'n', long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Cluster ID.
    #[arg(long, value_name = "UUID")]
    pub(crate) uuid: Option<String>,
}

/// Addresses of nodes to attach, by role.
#[derive(Debug, Default, Args)]
pub(crate) struct RoleArgs {
    /// Addresses of nodes to attach as masters.
    #[arg(long = "master-ip", value_name = "IP", value_delimiter = ',')]
    pub(crate) masters: Vec<String>,
    /// Addresses of nodes to attach as workers.
    #[arg(long = "worker-ip", value_name = "IP", value_delimiter = ',')]
    pub(crate) workers: Vec<String>,
}

/// Arguments for `pf9ctl cluster create`.
#[derive(Debug, Args)]
pub(crate) struct CreateClusterArgs {
    /// Name of the new cluster.
    #[arg(short = 'n', long, value_name = "NAME")]
    pub(crate) name: String,
    /// Nodes to attach.
    #[command(flatten)]
    pub(crate) roles: RoleArgs,
    /// Pod network CIDR.
    #[arg(long, value_name = "CIDR", default_value = "10.20.0.0/16")]
    pub(crate) containers_cidr: String,
    /// Service network CIDR.
    #[arg(long, value_name = "CIDR", default_value = "10.21.0.0/16")]
    pub(crate) services_cidr: String,
    /// Virtual IP fronting the API servers of a multi-master cluster.
    #[arg(long, value_name = "IP", default_value = "")]
    pub(crate) master_vip: String,
    /// Interface carrying the virtual IP.
    #[arg(long, value_name = "IFACE", default_value = "")]
    pub(crate) master_vip_iface: String,
    /// MetalLB address pool.
    #[arg(long, value_name = "CIDR", default_value = "")]
    pub(crate) metallb_cidr: String,
    /// CNI plugin.
    #[arg(long, value_name = "PLUGIN", default_value = "calico")]
    pub(crate) network_plugin: String,
    /// Allow privileged containers.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub(crate) privileged: bool,
    /// Schedule workloads on master nodes.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub(crate) allow_workloads_on_master: bool,
    /// Deploy the application catalog.
    #[arg(long)]
    pub(crate) app_catalog_enabled: bool,
    /// One-time MFA passcode for the control plane.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}

/// Arguments for `pf9ctl cluster attach-node`.
#[derive(Debug, Args)]
pub(crate) struct AttachArgs {
    /// Cluster to attach to.
    #[command(flatten)]
    pub(crate) cluster: ClusterTarget,
    /// Nodes to attach.
    #[command(flatten)]
    pub(crate) roles: RoleArgs,
    /// One-time MFA passcode for the control plane.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}

/// Arguments for `pf9ctl cluster delete-cluster`.
#[derive(Debug, Args)]
pub(crate) struct DeleteClusterArgs {
    /// Cluster to delete.
    #[command(flatten)]
    pub(crate) cluster: ClusterTarget,
    /// One-time MFA passcode for the control plane.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}

/// Arguments for `pf9ctl set-proxy`.
#[derive(Debug, Args)]
pub(crate) struct SetProxyArgs {
    /// Proxy protocol.
    #[arg(long, value_name = "PROTOCOL", default_value = "http")]
    pub(crate) protocol: String,
    /// Proxy host.
    #[arg(long = "host-ip", value_name = "HOST")]
    pub(crate) host: String,
    /// Proxy port.
    #[arg(long, value_name = "PORT")]
    pub(crate) port: u16,
    /// Proxy user.
    #[arg(long = "proxy-user", value_name = "USER")]
    pub(crate) proxy_user: Option<String>,
    /// Proxy password.
    #[arg(long = "proxy-password", value_name = "PASSWORD")]
    pub(crate) proxy_password: Option<String>,
    /// Node credentials.
    #[command(flatten)]
    pub(crate) node: NodeArgs,
}

/// `pf9ctl config` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ConfigCommand {
    /// Capture credentials interactively and store them.
    Create,
    /// Validate and store credentials given as flags.
    Set(ConfigSetArgs),
    /// Show the stored credentials with the password masked.
    Get,
}

/// Arguments for `pf9ctl config set`.
#[derive(Debug, Args)]
pub(crate) struct ConfigSetArgs {
    /// Account URL of the control plane.
    #[arg(long = "account-url", value_name = "URL")]
    pub(crate) account_url: String,
    /// Identity-service user name.
    #[arg(long, value_name = "USER")]
    pub(crate) username: String,
    /// Identity-service password.
    #[arg(long, value_name = "PASSWORD")]
    pub(crate) password: String,
    /// Region.
    #[arg(long, value_name = "REGION", default_value = "RegionOne")]
    pub(crate) region: String,
    /// Tenant (project) name or ID.
    #[arg(long, value_name = "TENANT", default_value = "service")]
    pub(crate) tenant: String,
    /// HTTPS proxy for control-plane calls and node commands.
    #[arg(long = "proxy-url", value_name = "URL")]
    pub(crate) proxy_url: Option<String>,
    /// Hosts that bypass the proxy.
    #[arg(long = "no-proxy", value_name = "HOSTS")]
    pub(crate) no_proxy: Option<String>,
    /// Skip TLS verification for control-plane calls.
    #[arg(long)]
    pub(crate) allow_insecure: bool,
    /// One-time MFA passcode used while validating.
    #[arg(short = 'm', long = "mfa", value_name = "CODE")]
    pub(crate) mfa: Option<String>,
}
