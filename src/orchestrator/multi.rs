//! Running one pipeline per host and collecting the results.

use std::future::Future;

use futures::future::join_all;

use crate::error::Pf9Error;

/// Result of one host's pipeline.
#[derive(Debug)]
pub enum HostStatus {
    /// The pipeline finished; the text summarises what happened.
    Succeeded(String),
    /// Nothing was done for the host; the text says why.
    Skipped(String),
    /// The pipeline failed.
    Failed(Pf9Error),
}

impl HostStatus {
    /// Converts a pipeline result, describing success with `describe`.
    #[must_use]
    pub fn from_result<T>(result: Result<T, Pf9Error>, describe: impl FnOnce(T) -> String) -> Self {
        match result {
            Ok(value) => Self::Succeeded(describe(value)),
            Err(err) => Self::Failed(err),
        }
    }

    /// Returns `true` for [`HostStatus::Failed`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One row of the per-host result table.
#[derive(Debug)]
pub struct HostReport {
    /// Address the operator named.
    pub host: String,
    /// What happened on that host.
    pub status: HostStatus,
}

impl HostReport {
    /// Builds a report row.
    #[must_use]
    pub fn new(host: &str, status: HostStatus) -> Self {
        Self {
            host: host.to_owned(),
            status,
        }
    }
}

/// Runs `pipeline` for every host concurrently and reports in input order.
///
/// A failing host never stops its siblings.
pub async fn run_per_host<F, Fut>(hosts: &[String], pipeline: F) -> Vec<HostReport>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = HostStatus>,
{
    join_all(hosts.iter().map(|host| {
        let run = pipeline(host.clone());
        async move { HostReport::new(host, run.await) }
    }))
    .await
}

/// Exit code for a multi-host command: the first failing host's code, or 0.
#[must_use]
pub fn exit_code_for(reports: &[HostReport]) -> i32 {
    reports
        .iter()
        .find_map(|report| match &report.status {
            HostStatus::Failed(err) => Some(err.exit_code()),
            _ => None,
        })
        .unwrap_or(0)
}
