//! Core library for `pf9ctl`, the node-preparation tool for Platform9
//! managed Kubernetes.
//!
//! The crate loads and validates operator credentials ([`config`],
//! [`auth`]), runs commands on the local host or over SSH ([`executor`],
//! [`ssh`]), probes nodes ([`platform`]) and talks to the control plane
//! ([`control_plane`]). [`orchestrator`] strings these together into the
//! prep, authorize, decommission and cluster pipelines.

pub mod auth;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod scrub;
pub mod ssh;
pub mod telemetry;
pub mod test_support;

pub use config::{ConfigLoader, ConfigStore, NodeConfig, OperatorConfig, RuntimeSettings, Session};
pub use control_plane::{ControlPlaneApi, ControlPlaneClient, RetryPolicy};
pub use error::{ErrorCategory, Pf9Error};
pub use executor::{Executor, ExecutorError, LocalExecutor, RemoteExecutor};
pub use orchestrator::{NodeOrchestrator, OrchestratorContext, PrepOutcome, Stage};
