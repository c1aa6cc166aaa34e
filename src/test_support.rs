//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here replace the executor, the terminal, the credential
//! store, the identity service and the control plane so node pipelines can
//! be driven deterministically without hosts or network access.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Duration as ChronoDuration, Utc};

use crate::auth::AuthToken;
use crate::config::{
    ConfigError, ConfigStoreError, CredentialStore, CredentialValidator, OperatorConfig,
    PromptError, Prompter, Session, ValidationFuture,
};
use crate::control_plane::{
    ApiFuture, ClusterCreateRequest, ClusterSummary, ControlPlaneApi, ControlPlaneError,
    HostExtensions, HostMatch, HostRecord, IpAddressExtension, NodeRole,
};
use crate::executor::{ExecFuture, Executor, ExecutorError, ExecutorKind};
use crate::platform::OsFamily;
use crate::telemetry::{Event, EventSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reply produced by a [`ScriptedExecutor`] rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// The command succeeds and prints `stdout`.
    Stdout(String),
    /// The command exits with `code` and prints `stderr`.
    Exit {
        /// Exit status.
        code: i32,
        /// Standard error text.
        stderr: String,
    },
}

#[derive(Clone, Debug)]
struct Rule {
    prefix: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// A file copied through [`Executor::stage_file`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedFile {
    /// Source path on the operator's host.
    pub local: Utf8PathBuf,
    /// Destination on the target.
    pub remote: String,
    /// Requested permission bits.
    pub mode: u32,
}

/// Executor double that answers commands from prefix rules.
///
/// Each command is recorded as `program arg arg ...` joined with single
/// spaces. The first rule whose prefix matches the recorded line answers it;
/// unmatched commands succeed with empty output.
#[derive(Debug)]
pub struct ScriptedExecutor {
    kind: ExecutorKind,
    target: String,
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    staged: Mutex<Vec<StagedFile>>,
    last_stderr: Mutex<String>,
}

impl ScriptedExecutor {
    /// Builds an executor double of `kind` reporting `target`.
    #[must_use]
    pub fn new(kind: ExecutorKind, target: &str) -> Self {
        Self {
            kind,
            target: target.to_owned(),
            rules: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            last_stderr: Mutex::new(String::new()),
        }
    }

    /// A local executor double.
    #[must_use]
    pub fn local() -> Self {
        Self::new(ExecutorKind::Local, "localhost")
    }

    /// A remote executor double bound to `host`.
    #[must_use]
    pub fn remote(host: &str) -> Self {
        Self::new(ExecutorKind::Remote, host)
    }

    /// An Ubuntu 20.04 host that passes every prerequisite and has not been
    /// prepared yet.
    #[must_use]
    pub fn healthy_ubuntu(self) -> Self {
        self.on("cat /etc/os-release", UBUNTU_2004)
            .on("id -u", "0\n")
            .on("getconf _NPROCESSORS_ONLN", "4\n")
            .on("getconf _PHYS_PAGES", "4194304\n")
            .on("getconf PAGE_SIZE", "4096\n")
            .on("df -k", "1K-blocks Avail\n62914560 41943040\n")
            .on("bash -c netstat", "Local\nAddress\n0.0.0.0:22\n")
            .exit("test -f /etc/pf9/host_id.conf", 1, "")
    }

    /// Answers commands starting with `prefix` with `stdout`, every time.
    #[must_use]
    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.rule(prefix, Reply::Stdout(stdout.to_owned()), None)
    }

    /// Answers the next command starting with `prefix` with `stdout`, once.
    #[must_use]
    pub fn once(self, prefix: &str, stdout: &str) -> Self {
        self.rule(prefix, Reply::Stdout(stdout.to_owned()), Some(1))
    }

    /// Fails commands starting with `prefix` with `code` and `stderr`.
    #[must_use]
    pub fn exit(self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.rule(
            prefix,
            Reply::Exit {
                code,
                stderr: stderr.to_owned(),
            },
            None,
        )
    }

    /// Inserts a rule ahead of every existing rule.
    #[must_use]
    pub fn rule(self, prefix: &str, reply: Reply, remaining: Option<usize>) -> Self {
        lock(&self.rules).insert(
            0,
            Rule {
                prefix: prefix.to_owned(),
                reply,
                remaining,
            },
        );
        self
    }

    /// Every command run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Returns `true` when any recorded command starts with `prefix`.
    #[must_use]
    pub fn ran(&self, prefix: &str) -> bool {
        lock(&self.commands)
            .iter()
            .any(|command| command.starts_with(prefix))
    }

    /// Recorded commands starting with `prefix`.
    #[must_use]
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        lock(&self.commands)
            .iter()
            .filter(|command| command.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Files staged so far.
    #[must_use]
    pub fn staged(&self) -> Vec<StagedFile> {
        lock(&self.staged).clone()
    }

    fn answer(&self, line: &str) -> Reply {
        let mut rules = lock(&self.rules);
        let found = rules.iter_mut().find(|rule| {
            line.starts_with(rule.prefix.as_str()) && rule.remaining.is_none_or(|left| left > 0)
        });
        found.map_or_else(
            || Reply::Stdout(String::new()),
            |rule| {
                if let Some(left) = rule.remaining.as_mut() {
                    *left -= 1;
                }
                rule.reply.clone()
            },
        )
    }
}

const UBUNTU_2004: &str = "NAME=\"Ubuntu\"\nVERSION=\"20.04.6 LTS (Focal Fossa)\"\nID=ubuntu\nID_LIKE=debian\nPRETTY_NAME=\"Ubuntu 20.04.6 LTS\"\nVERSION_ID=\"20.04\"\n";

impl Executor for ScriptedExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn run_with_stdout<'a>(
        &'a self,
        program: &'a str,
        args: &'a [&'a str],
    ) -> ExecFuture<'a, String> {
        let mut line = String::from(program);
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        lock(&self.commands).push(line.clone());
        let reply = self.answer(&line);
        Box::pin(async move {
            match reply {
                Reply::Stdout(stdout) => {
                    lock(&self.last_stderr).clear();
                    Ok(stdout)
                }
                Reply::Exit { code, stderr } => {
                    stderr.clone_into(&mut lock(&self.last_stderr));
                    Err(ExecutorError::Failed {
                        command: line,
                        exit_code: Some(code),
                        stderr,
                    })
                }
            }
        })
    }

    fn stage_file<'a>(
        &'a self,
        local_path: &'a Utf8Path,
        remote_path: &'a str,
        mode: u32,
    ) -> ExecFuture<'a, ()> {
        lock(&self.staged).push(StagedFile {
            local: local_path.to_path_buf(),
            remote: remote_path.to_owned(),
            mode,
        });
        Box::pin(async { Ok(()) })
    }

    fn last_stderr(&self) -> String {
        lock(&self.last_stderr).clone()
    }
}

/// Scripted answer consumed by [`ScriptedPrompter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Answer {
    /// Answer to [`Prompter::input`] or [`Prompter::password`].
    Text(String),
    /// Answer to [`Prompter::confirm`].
    Confirm(bool),
    /// Answer to [`Prompter::select`].
    Select(usize),
}

/// Prompter double that replays queued answers and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<Answer>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Builds a prompter that replays `answers` in order.
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queues the answers for one full operator-config capture.
    #[must_use]
    pub fn operator_answers(account: &str, username: &str, password: &str, region: &str) -> Vec<Answer> {
        [account, username, password, region, "service", "None", "None"]
            .into_iter()
            .map(|text| Answer::Text(text.to_owned()))
            .collect()
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Answers not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.answers).len()
    }

    fn next(&self, prompt: &str) -> Result<Answer, PromptError> {
        lock(&self.prompts).push(prompt.to_owned());
        lock(&self.answers).pop_front().ok_or_else(|| PromptError {
            message: format!("no scripted answer for {prompt:?}"),
        })
    }

    fn mismatch(prompt: &str, answer: &Answer) -> PromptError {
        PromptError {
            message: format!("scripted answer {answer:?} does not fit {prompt:?}"),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, PromptError> {
        match self.next(prompt)? {
            Answer::Text(text) if text.is_empty() => Ok(default.unwrap_or_default().to_owned()),
            Answer::Text(text) => Ok(text),
            other => Err(Self::mismatch(prompt, &other)),
        }
    }

    fn password(&self, prompt: &str, _allow_empty: bool) -> Result<String, PromptError> {
        match self.next(prompt)? {
            Answer::Text(text) => Ok(text),
            other => Err(Self::mismatch(prompt, &other)),
        }
    }

    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool, PromptError> {
        match self.next(prompt)? {
            Answer::Confirm(value) => Ok(value),
            other => Err(Self::mismatch(prompt, &other)),
        }
    }

    fn select(&self, prompt: &str, _items: &[&str], _default: usize) -> Result<usize, PromptError> {
        match self.next(prompt)? {
            Answer::Select(index) => Ok(index),
            other => Err(Self::mismatch(prompt, &other)),
        }
    }
}

/// In-memory [`CredentialStore`] that mimics the on-disk save rules.
#[derive(Debug)]
pub struct MemoryStore {
    location: Utf8PathBuf,
    stored: Mutex<Option<OperatorConfig>>,
    saves: AtomicU32,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            location: Utf8PathBuf::from("/home/operator/pf9/db/config.json"),
            stored: Mutex::new(None),
            saves: AtomicU32::new(0),
        }
    }

    /// A store already holding `config`.
    #[must_use]
    pub fn holding(config: OperatorConfig) -> Self {
        let store = Self::empty();
        *lock(&store.stored) = Some(config);
        store
    }

    /// Configuration currently stored.
    #[must_use]
    pub fn current(&self) -> Option<OperatorConfig> {
        lock(&self.stored).clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CredentialStore for MemoryStore {
    fn location(&self) -> &Utf8Path {
        &self.location
    }

    fn load(&self) -> Result<Option<OperatorConfig>, ConfigStoreError> {
        Ok(self.current())
    }

    fn save(&self, config: &OperatorConfig) -> Result<Utf8PathBuf, ConfigStoreError> {
        let mut persisted = config.clone();
        persisted.mfa_token.clear();
        *lock(&self.stored) = Some(persisted);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(self.location.clone())
    }
}

/// A token valid for one hour, scoped to project `proj-1`.
#[must_use]
pub fn test_token() -> AuthToken {
    AuthToken {
        token: String::from("tok-123"),
        user_id: String::from("user-1"),
        project_id: String::from("proj-1"),
        du_fqdn: String::from("acme.platform9.net"),
        email: String::from("ops@acme.io"),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    }
}

/// A complete operator configuration for `https://acme.platform9.net`.
#[must_use]
pub fn operator_config() -> OperatorConfig {
    OperatorConfig {
        account_url: String::from("https://acme.platform9.net"),
        username: String::from("ops@acme.io"),
        password: String::from("hunter2"),
        ..OperatorConfig::default()
    }
}

/// Validator double accepting one password and one region.
#[derive(Debug)]
pub struct StaticValidator {
    password: String,
    region: String,
    calls: AtomicU32,
}

impl StaticValidator {
    /// Accepts configurations with `password` in `region`.
    #[must_use]
    pub fn accepting(password: &str, region: &str) -> Self {
        Self {
            password: password.to_owned(),
            region: region.to_owned(),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of validations attempted.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, config: &OperatorConfig) -> Result<Session, ConfigError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if config.password != self.password {
            return Err(ConfigError::InvalidCreds {
                message: String::from("The request you have made requires authentication."),
            });
        }
        if config.region != self.region {
            return Err(ConfigError::InvalidRegion {
                region: config.region.clone(),
            });
        }
        Ok(Session {
            config: config.clone(),
            token: test_token(),
            endpoint: config.account_base()?,
        })
    }
}

impl CredentialValidator for StaticValidator {
    fn validate<'a>(&'a self, config: &'a OperatorConfig) -> ValidationFuture<'a> {
        let result = self.check(config);
        Box::pin(async move { result })
    }
}

/// Builds a host record reporting `ip`.
#[must_use]
pub fn host_record(uuid: &str, ip: &str, cluster: &str, master: bool) -> HostRecord {
    HostRecord {
        uuid: uuid.to_owned(),
        name: format!("node-{uuid}"),
        primary_ip: ip.to_owned(),
        cluster_uuid: cluster.to_owned(),
        is_master: u8::from(master),
        extensions: HostExtensions {
            ip_address: IpAddressExtension {
                data: vec![ip.to_owned()],
            },
        },
    }
}

/// Control-plane double that serves canned state and records every call.
#[derive(Debug, Default)]
pub struct RecordingControlPlane {
    hosts: Mutex<Vec<HostRecord>>,
    clusters: Mutex<Vec<ClusterSummary>>,
    authorize_failures: Mutex<VecDeque<u16>>,
    converge: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

impl RecordingControlPlane {
    /// An empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host.
    #[must_use]
    pub fn with_host(self, host: HostRecord) -> Self {
        lock(&self.hosts).push(host);
        self
    }

    /// Registers a cluster.
    #[must_use]
    pub fn with_cluster(self, uuid: &str, name: &str) -> Self {
        lock(&self.clusters).push(ClusterSummary {
            uuid: uuid.to_owned(),
            name: name.to_owned(),
            status: String::from("ok"),
        });
        self
    }

    /// Fails the next authorizations with `statuses`, one per call.
    #[must_use]
    pub fn failing_authorize(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        lock(&self.authorize_failures).extend(statuses);
        self
    }

    /// Serves `statuses` from successive converge-status reads; the last
    /// one repeats.
    #[must_use]
    pub fn converging(self, statuses: &[&str]) -> Self {
        lock(&self.converge).extend(statuses.iter().map(|status| (*status).to_owned()));
        self
    }

    /// Every call made so far, as `Operation arg...`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Recorded calls whose operation is `op`.
    #[must_use]
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(op))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn host(&self, id: &str) -> Option<HostRecord> {
        lock(&self.hosts).iter().find(|host| host.uuid == id).cloned()
    }

    fn not_found(op: &'static str) -> ControlPlaneError {
        ControlPlaneError::Status {
            op,
            status: 404,
            body: String::from("not found"),
        }
    }
}

impl ControlPlaneApi for RecordingControlPlane {
    fn get_host_ids<'a>(&'a self, _token: &'a str, ips: &'a [String]) -> ApiFuture<'a, Vec<HostMatch>> {
        self.record(format!("GetHostId {}", ips.join(",")));
        let hosts = lock(&self.hosts).clone();
        let matches = ips
            .iter()
            .filter_map(|ip| {
                hosts.iter().find(|host| host.has_ip(ip)).map(|host| HostMatch {
                    ip: ip.clone(),
                    host_id: host.uuid.clone(),
                })
            })
            .collect();
        Box::pin(async move { Ok(matches) })
    }

    fn authorize_host<'a>(&'a self, host_id: &'a str, _token: &'a str) -> ApiFuture<'a, ()> {
        self.record(format!("AuthorizeHost {host_id}"));
        let failure = lock(&self.authorize_failures).pop_front();
        Box::pin(async move {
            failure.map_or(Ok(()), |status| {
                Err(ControlPlaneError::Status {
                    op: "AuthorizeHost",
                    status,
                    body: String::new(),
                })
            })
        })
    }

    fn deauthorize_node<'a>(&'a self, node_id: &'a str, _token: &'a str) -> ApiFuture<'a, ()> {
        self.record(format!("DeauthorizeNode {node_id}"));
        Box::pin(async { Ok(()) })
    }

    fn get_node_info<'a>(
        &'a self,
        _token: &'a str,
        _project_id: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, HostRecord> {
        self.record(format!("GetNodeInfo {node_id}"));
        let host = self.host(node_id);
        Box::pin(async move { host.ok_or_else(|| Self::not_found("GetNodeInfo")) })
    }

    fn get_all_nodes<'a>(
        &'a self,
        _token: &'a str,
        _project_id: &'a str,
    ) -> ApiFuture<'a, Vec<HostRecord>> {
        self.record(String::from("GetAllNodes"));
        let hosts = lock(&self.hosts).clone();
        Box::pin(async move { Ok(hosts) })
    }

    fn check_cluster_exists<'a>(
        &'a self,
        name: &'a str,
        _project_id: &'a str,
        _token: &'a str,
    ) -> ApiFuture<'a, Option<String>> {
        self.record(format!("CheckClusterExists {name}"));
        let found = lock(&self.clusters)
            .iter()
            .find(|cluster| cluster.name == name)
            .map(|cluster| cluster.uuid.clone());
        Box::pin(async move { Ok(found) })
    }

    fn create_cluster<'a>(
        &'a self,
        request: &'a ClusterCreateRequest,
        _project_id: &'a str,
        _token: &'a str,
    ) -> ApiFuture<'a, String> {
        self.record(format!("CreateCluster {}", request.name));
        let mut clusters = lock(&self.clusters);
        let result = if clusters.iter().any(|cluster| cluster.name == request.name) {
            Err(ControlPlaneError::ClusterExists {
                name: request.name.clone(),
            })
        } else {
            let uuid = format!("cluster-{}", clusters.len() + 1);
            clusters.push(ClusterSummary {
                uuid: uuid.clone(),
                name: request.name.clone(),
                status: String::from("pending"),
            });
            Ok(uuid)
        };
        drop(clusters);
        Box::pin(async move { result })
    }

    fn attach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        _project_id: &'a str,
        _token: &'a str,
        node_ids: &'a [String],
        role: NodeRole,
    ) -> ApiFuture<'a, ()> {
        self.record(format!(
            "AttachNode {cluster_id} {} {}",
            role.as_str(),
            node_ids.join(",")
        ));
        let mut hosts = lock(&self.hosts);
        for host in hosts.iter_mut().filter(|host| node_ids.contains(&host.uuid)) {
            cluster_id.clone_into(&mut host.cluster_uuid);
            host.is_master = u8::from(role == NodeRole::Master);
        }
        drop(hosts);
        Box::pin(async { Ok(()) })
    }

    fn detach_node<'a>(
        &'a self,
        cluster_id: &'a str,
        _project_id: &'a str,
        _token: &'a str,
        node_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        self.record(format!("DetachNode {cluster_id} {node_id}"));
        if let Some(host) = lock(&self.hosts).iter_mut().find(|host| host.uuid == node_id) {
            host.cluster_uuid.clear();
        }
        Box::pin(async { Ok(()) })
    }

    fn delete_cluster<'a>(
        &'a self,
        cluster_id: &'a str,
        _project_id: &'a str,
        _token: &'a str,
    ) -> ApiFuture<'a, ()> {
        self.record(format!("DeleteCluster {cluster_id}"));
        lock(&self.clusters).retain(|cluster| cluster.uuid != cluster_id);
        Box::pin(async { Ok(()) })
    }

    fn get_converge_status<'a>(
        &'a self,
        cluster_id: &'a str,
        _project_id: &'a str,
        _token: &'a str,
    ) -> ApiFuture<'a, String> {
        self.record(format!("GetConvergeStatus {cluster_id}"));
        let mut queue = lock(&self.converge);
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let status = next.unwrap_or_else(|| String::from("ok"));
        drop(queue);
        Box::pin(async move { Ok(status) })
    }

    fn download_installer<'a>(&'a self, _token: &'a str, family: OsFamily) -> ApiFuture<'a, Vec<u8>> {
        self.record(format!("DownloadInstaller {}", family.installer_flavour()));
        Box::pin(async { Ok(b"#!/bin/bash\necho installing\n".to_vec()) })
    }
}

/// Event sink that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    /// Events emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &Event) {
        lock(&self.events).push(event.clone());
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
