//! Command handlers for the `pf9ctl` binary.
//!
//! Each handler loads what it needs (settings, credentials, executors),
//! drives the library pipelines and prints the result lines. Handlers return
//! the process exit code; errors they return are printed by [`run`].

use std::future::Future;
use std::io::{self, Write};

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use pf9ctl::auth::IdentityValidator;
use pf9ctl::config::{
    ConfigError, ConfigLoader, ConfigStore, CredentialStore, DialoguerPrompter, NodeConfig,
    OperatorConfig, Prompter, RuntimeSettings, Session, complete_node_config,
    prompt_operator_config, state_dir,
};
use pf9ctl::control_plane::{ClusterCreateRequest, ControlPlaneClient, RetryPolicy};
use pf9ctl::error::Pf9Error;
use pf9ctl::executor::{Executor, executor_for, executor_for_host};
use pf9ctl::http::build_client;
use pf9ctl::logging;
use pf9ctl::orchestrator::{
    ClusterRef, DeauthorizeOutcome, HostReport, HostStatus, NodeOrchestrator,
    OrchestratorContext, ProxySpec, Stage, exit_code_for, run_per_host,
};
use pf9ctl::report;
use pf9ctl::scrub::{MASK, scrub_command};
use pf9ctl::telemetry::sink_from_env;

use crate::cli::{
    AttachArgs, Cli, ClusterCommand, ClusterTarget, Command, ConfigCommand, ConfigSetArgs,
    CreateClusterArgs, DeauthorizeArgs, DetachArgs, NodeArgs, NodeCommand, SetProxyArgs,
};

static PROMPTER: DialoguerPrompter = DialoguerPrompter;

const LOG_DIR_NAME: &str = "log";

/// Runs one parsed command line and returns the process exit code.
///
/// The command races the operator's interrupt; an interrupt reports
/// [`Pf9Error::Cancelled`] and leaves partial effects in place.
pub(crate) async fn run(cli: Cli) -> i32 {
    let state = match state_dir() {
        Ok(dir) => dir,
        Err(err) => return fail(&Pf9Error::from(ConfigError::from(err))),
    };
    let _log_guard = match logging::init(&state.join(LOG_DIR_NAME), cli.verbose) {
        Ok(guard) => Some(guard),
        Err(err) => {
            writeln!(io::stderr(), "warning: file logging disabled: {err}").ok();
            None
        }
    };
    let settings = match RuntimeSettings::load_without_cli_args() {
        Ok(settings) => settings,
        Err(err) => return fail(&Pf9Error::from(err)),
    };
    let app = App {
        state,
        settings,
        interactive: !cli.no_prompt,
    };

    tokio::select! {
        result = app.dispatch(cli.command) => result.unwrap_or_else(|err| fail(&err)),
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupted by operator");
            fail(&Pf9Error::Cancelled)
        }
    }
}

fn fail(err: &Pf9Error) -> i32 {
    debug!(error = ?err, "command failed");
    report::failure(&mut io::stdout().lock(), err).ok();
    err.exit_code()
}

fn succeed(message: &str) -> i32 {
    report::success(&mut io::stdout().lock(), message).ok();
    0
}

/// Prints per-host results and picks the exit code.
///
/// A single host prints one result line; several hosts print a table.
fn conclude(reports: &[HostReport], message: &str) -> i32 {
    let mut out = io::stdout().lock();
    if let [only] = reports {
        match &only.status {
            HostStatus::Succeeded(_) => {
                report::success(&mut out, message).ok();
            }
            HostStatus::Skipped(detail) => {
                report::success(&mut out, &format!("{}: {detail}", only.host)).ok();
            }
            HostStatus::Failed(err) => {
                report::failure(&mut out, err).ok();
            }
        }
    } else {
        report::host_table(&mut out, reports).ok();
        for failed in reports.iter().filter(|report| report.status.is_failure()) {
            if let HostStatus::Failed(err @ Pf9Error::PrereqFailed { .. }) = &failed.status {
                writeln!(out, "{}:", failed.host).ok();
                report::failure(&mut out, err).ok();
            }
        }
        if reports.iter().all(|report| !report.status.is_failure()) {
            report::success(&mut out, message).ok();
        }
    }
    exit_code_for(reports)
}

struct App {
    state: Utf8PathBuf,
    settings: RuntimeSettings,
    interactive: bool,
}

impl App {
    async fn dispatch(&self, command: Command) -> Result<i32, Pf9Error> {
        match command {
            Command::PrepNode(args) => self.prep_node(args).await,
            Command::CheckNode(args) => self.check_node(args).await,
            Command::AuthorizeNode(args) => self.authorize_node(args).await,
            Command::DeauthorizeNode(args) => self.deauthorize_node(args).await,
            Command::Node(NodeCommand::Detach(args)) => self.detach(args).await,
            Command::Node(NodeCommand::Decommission(args)) => self.decommission(args).await,
            Command::Cluster(ClusterCommand::Create(args)) => self.create_cluster(args).await,
            Command::Cluster(ClusterCommand::AttachNode(args)) => self.attach_node(args).await,
            Command::Cluster(ClusterCommand::DeleteCluster(args)) => {
                self.delete_cluster(args.cluster, args.mfa).await
            }
            Command::SetProxy(args) => self.set_proxy(args).await,
            Command::Config(ConfigCommand::Create) => self.config_create().await,
            Command::Config(ConfigCommand::Set(args)) => self.config_set(args).await,
            Command::Config(ConfigCommand::Get) => Self::config_get(),
        }
    }

    fn prompter(&self) -> Option<&'static dyn Prompter> {
        self.interactive.then_some(&PROMPTER as &dyn Prompter)
    }

    fn store() -> Result<ConfigStore, Pf9Error> {
        ConfigStore::for_current_user().map_err(|err| ConfigError::from(err).into())
    }

    fn validator(&self) -> IdentityValidator {
        IdentityValidator::new(self.settings.http_timeout())
    }

    async fn session(&self, mfa: Option<String>) -> Result<Session, Pf9Error> {
        let store = Self::store()?;
        let validator = self.validator();
        let loader = ConfigLoader::new(&store, &validator);
        let caller = OperatorConfig {
            mfa_token: mfa.unwrap_or_default(),
            ..OperatorConfig::default()
        };
        let session = match self.prompter() {
            Some(prompter) => loader.load_interactive(&caller, prompter).await?,
            None => loader.load(&caller).await?,
        };
        debug!(endpoint = %session.endpoint, project = %session.token.project_id, "session ready");
        Ok(session)
    }

    fn orchestrator(&self, session: &Session) -> Result<NodeOrchestrator<ControlPlaneClient>, Pf9Error> {
        let http = build_client(&session.config, self.settings.http_timeout()).map_err(|err| {
            Pf9Error::Config {
                message: err.to_string(),
            }
        })?;
        let api = ControlPlaneClient::new(
            http,
            session.endpoint.clone(),
            RetryPolicy::from_settings(&self.settings),
        );
        let ctx = OrchestratorContext::from_session(session, &self.settings, self.state.clone());
        Ok(NodeOrchestrator::new(api, ctx, sink_from_env()))
    }

    fn node_config(&self, args: NodeArgs) -> Result<NodeConfig, Pf9Error> {
        let node = NodeConfig {
            user: args.user.unwrap_or_default(),
            password: args.password,
            ssh_key: args.ssh_key.map(Utf8PathBuf::from),
            ips: args.ips,
            sudo_password: args.sudo_password,
            mfa_token: args.mfa,
        };
        Ok(complete_node_config(node, self.prompter())?)
    }

    async fn executor(&self, session: &Session, node: &NodeConfig) -> Result<Box<dyn Executor>, Pf9Error> {
        executor_for(session.config.proxy(), node, &self.settings)
            .await
            .map_err(|err| Pf9Error::executor(Stage::BuildExecutor, err))
    }

    /// Runs `pipeline` once per target host, each with its own executor.
    async fn per_host<F, Fut>(
        &self,
        session: &Session,
        node: &NodeConfig,
        pipeline: F,
    ) -> Vec<HostReport>
    where
        F: Fn(Box<dyn Executor>) -> Fut,
        Fut: Future<Output = HostStatus>,
    {
        let hosts = node.hosts();
        let proxy = session.config.proxy();
        let run_pipeline = &pipeline;
        run_per_host(&hosts, |host| async move {
            match executor_for_host(&host, proxy, node, &self.settings).await {
                Ok(executor) => run_pipeline(executor).await,
                Err(err) => HostStatus::Failed(Pf9Error::executor(Stage::BuildExecutor, err)),
            }
        })
        .await
    }

    async fn prep_node(&self, args: NodeArgs) -> Result<i32, Pf9Error> {
        let mfa = args.mfa.clone();
        let node = self.node_config(args)?;
        let session = self.session(mfa).await?;
        let orchestrator = &self.orchestrator(&session)?;
        let reports = self
            .per_host(&session, &node, |executor| async move {
                HostStatus::from_result(orchestrator.prep_node(executor.as_ref()).await, |outcome| {
                    if outcome.already_prepped {
                        format!("already prepared; host {} authorized", outcome.host_id)
                    } else {
                        format!("host {} authorized", outcome.host_id)
                    }
                })
            })
            .await;
        Ok(conclude(&reports, "Node added to resmgr successfully"))
    }

    async fn check_node(&self, args: NodeArgs) -> Result<i32, Pf9Error> {
        let mfa = args.mfa.clone();
        let node = self.node_config(args)?;
        let session = self.session(mfa).await?;
        let orchestrator = &self.orchestrator(&session)?;
        let reports = self
            .per_host(&session, &node, |executor| async move {
                HostStatus::from_result(orchestrator.check_node(executor.as_ref()).await, |checks| {
                    let warnings = checks.iter().filter(|check| check.failed()).count();
                    format!("{} checks run, {warnings} warning(s)", checks.len())
                })
            })
            .await;
        Ok(conclude(&reports, "All prerequisite checks passed"))
    }

    async fn authorize_node(&self, args: NodeArgs) -> Result<i32, Pf9Error> {
        let mfa = args.mfa.clone();
        let node = self.node_config(args)?;
        let session = self.session(mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let executor = self.executor(&session, &node).await?;
        let host_id = orchestrator.authorize_node(executor.as_ref()).await?;
        Ok(succeed(&format!("Node {host_id} authorized")))
    }

    async fn deauthorize_node(&self, args: DeauthorizeArgs) -> Result<i32, Pf9Error> {
        let mfa = args.node.mfa.clone();
        let node = self.node_config(args.node)?;
        let session = self.session(mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let executor = self.executor(&session, &node).await?;
        let outcome = orchestrator
            .deauthorize_node(executor.as_ref(), args.ip.as_deref(), self.prompter())
            .await?;
        Ok(describe_deauthorize(&outcome))
    }

    async fn detach(&self, args: DetachArgs) -> Result<i32, Pf9Error> {
        let session = self.session(args.mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let reports = orchestrator.detach_nodes(&args.node_ips).await?;
        Ok(conclude(&reports, "Nodes detached"))
    }

    async fn decommission(&self, args: NodeArgs) -> Result<i32, Pf9Error> {
        let mfa = args.mfa.clone();
        let node = self.node_config(args)?;
        let session = self.session(mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let executor = self.executor(&session, &node).await?;
        let outcome = orchestrator
            .decommission(executor.as_ref(), self.prompter())
            .await?;
        Ok(describe_deauthorize(&outcome))
    }

    async fn create_cluster(&self, args: CreateClusterArgs) -> Result<i32, Pf9Error> {
        let session = self.session(args.mfa.clone()).await?;
        let orchestrator = self.orchestrator(&session)?;
        let request = ClusterCreateRequest {
            name: args.name.clone(),
            containers_cidr: args.containers_cidr,
            services_cidr: args.services_cidr,
            master_vip: args.master_vip,
            master_vip_iface: args.master_vip_iface,
            metallb_cidr: args.metallb_cidr,
            network_plugin: args.network_plugin,
            privileged: args.privileged,
            allow_workloads_on_master: args.allow_workloads_on_master,
            app_catalog_enabled: args.app_catalog_enabled,
            node_pool_uuid: String::new(),
        };
        let created = orchestrator
            .create_cluster(&request, &args.roles.masters, &args.roles.workers)
            .await?;
        let mut out = io::stdout().lock();
        report::host_table(&mut out, &created.attached).ok();
        report::success(&mut out, &format!("Cluster {} created ({})", args.name, created.uuid)).ok();
        Ok(exit_code_for(&created.attached))
    }

    async fn attach_node(&self, args: AttachArgs) -> Result<i32, Pf9Error> {
        let session = self.session(args.mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let reports = orchestrator
            .attach_nodes(&cluster_ref(args.cluster), &args.roles.masters, &args.roles.workers)
            .await?;
        Ok(conclude(&reports, "Nodes attached"))
    }

    async fn delete_cluster(&self, target: ClusterTarget, mfa: Option<String>) -> Result<i32, Pf9Error> {
        let session = self.session(mfa).await?;
        let orchestrator = self.orchestrator(&session)?;
        let executor = self.executor(&session, &NodeConfig::default()).await?;
        let uuid = orchestrator
            .delete_cluster(executor.as_ref(), &cluster_ref(target))
            .await?;
        Ok(succeed(&format!("Cluster {uuid} deleted")))
    }

    async fn set_proxy(&self, args: SetProxyArgs) -> Result<i32, Pf9Error> {
        let spec = ProxySpec {
            protocol: args.protocol,
            host: args.host,
            port: args.port,
            user: args.proxy_user,
            password: args.proxy_password,
        };
        let mfa = args.node.mfa.clone();
        let node = self.node_config(args.node)?;
        let session = self.session(mfa).await?;
        let orchestrator = &self.orchestrator(&session)?;
        let proxy = &spec;
        let reports = self
            .per_host(&session, &node, |executor| async move {
                HostStatus::from_result(orchestrator.set_proxy(executor.as_ref(), proxy).await, |()| {
                    String::from("comms proxy configured")
                })
            })
            .await;
        Ok(conclude(&reports, "Proxy configured"))
    }

    async fn config_create(&self) -> Result<i32, Pf9Error> {
        let Some(prompter) = self.prompter() else {
            return Err(Pf9Error::Config {
                message: String::from("`config create` needs a terminal; use `config set` with --no-prompt"),
            });
        };
        let store = Self::store()?;
        let validator = self.validator();
        let seed = store_contents(&store)?.unwrap_or_default();
        let candidate = prompt_operator_config(prompter, &seed)?;
        ConfigLoader::new(&store, &validator)
            .validate_and_save(&candidate)
            .await?;
        Ok(succeed("Stored configuration details successfully"))
    }

    async fn config_set(&self, args: ConfigSetArgs) -> Result<i32, Pf9Error> {
        let config = OperatorConfig {
            account_url: args.account_url,
            username: args.username,
            password: args.password,
            tenant: args.tenant,
            region: args.region,
            allow_insecure: args.allow_insecure,
            proxy_url: args.proxy_url.unwrap_or_default(),
            no_proxy: args.no_proxy.unwrap_or_default(),
            mfa_token: args.mfa.unwrap_or_default(),
            ..OperatorConfig::default()
        };
        let store = Self::store()?;
        let validator = self.validator();
        ConfigLoader::new(&store, &validator)
            .validate_and_save(&config)
            .await?;
        Ok(succeed("Stored configuration details successfully"))
    }

    fn config_get() -> Result<i32, Pf9Error> {
        let store = Self::store()?;
        let Some(config) = store_contents(&store)? else {
            return Err(Pf9Error::NoConfig {
                path: store.location().to_path_buf(),
            });
        };
        let mut out = io::stdout().lock();
        for (key, value) in [
            ("Platform9 Account URL", config.account_url.as_str()),
            ("Username", config.username.as_str()),
            ("Password", MASK),
            ("Region", config.region.as_str()),
            ("Tenant", config.tenant.as_str()),
        ] {
            writeln!(out, "{key}: {value}").ok();
        }
        writeln!(out, "Proxy URL: {}", scrub_command(&config.proxy_url)).ok();
        writeln!(out, "Allow insecure: {}", config.allow_insecure).ok();
        Ok(0)
    }
}

fn store_contents(store: &ConfigStore) -> Result<Option<OperatorConfig>, Pf9Error> {
    store
        .load()
        .map_err(|err| ConfigError::from(err).into())
}

fn cluster_ref(target: ClusterTarget) -> ClusterRef {
    match (target.uuid, target.name) {
        (Some(uuid), _) => ClusterRef::Uuid(uuid),
        (None, name) => ClusterRef::Name(name.unwrap_or_default()),
    }
}

fn describe_deauthorize(outcome: &DeauthorizeOutcome) -> i32 {
    match outcome {
        DeauthorizeOutcome::Deauthorized { host_id } => succeed(&format!("Node {host_id} deauthorized")),
        DeauthorizeOutcome::Declined { host_id } => {
            succeed(&format!("Left node {host_id} untouched"))
        }
        DeauthorizeOutcome::Unregistered => succeed("Node was not registered; nothing to deauthorize"),
    }
}
