//! The prerequisite battery run before the host agent is installed.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::OsFamily;
use crate::executor::{Executor, ExecutorError};

/// Ports the host agent and Kubernetes components must be able to bind.
pub const REQUIRED_PORTS: [u16; 8] = [443, 2379, 2380, 4194, 8285, 10250, 10255, 3306];

const MIN_CPUS: u32 = 2;
const MIN_MEMORY_GIB: u64 = 12;
const MIN_DISK_TOTAL_GIB: u64 = 30;
const MIN_DISK_FREE_GIB: u64 = 15;
const KIB_PER_GIB: u64 = 1024 * 1024;

const LEGACY_CLEANUP: &str =
    r#"rm -rf /usr/bin/pf9ctl "$(getent passwd "${SUDO_USER:-root}" | cut -d: -f6)/pf9/pf9-venv""#;
const DEBIAN_PACKAGES: &str = r"dpkg -l | awk '/^ii/ && $2 ~ /^pf9-/ {print $2}'";
const LISTENING_ADDRESSES: &str = "netstat -tupln | awk '{print $4}'";

/// Whether a failing check stops node preparation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckSeverity {
    /// Reported, but preparation continues.
    Soft,
    /// Preparation stops.
    Hard,
}

/// Outcome of one prerequisite check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrereqCheck {
    /// Check name as shown to the operator.
    pub name: &'static str,
    /// Whether the host met the requirement.
    pub passed: bool,
    /// Why the check failed or could not run.
    pub err: Option<String>,
    /// Whether a failure is fatal.
    pub severity: CheckSeverity,
}

impl PrereqCheck {
    const fn pass(name: &'static str, severity: CheckSeverity) -> Self {
        Self {
            name,
            passed: true,
            err: None,
            severity,
        }
    }

    fn fail(name: &'static str, severity: CheckSeverity, err: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            err: Some(err.into()),
            severity,
        }
    }

    fn from_result(name: &'static str, severity: CheckSeverity, result: Result<(), String>) -> Self {
        result.map_or_else(
            |err| Self::fail(name, severity, err),
            |()| Self::pass(name, severity),
        )
    }

    /// A check that reported an error counts as failed even if `passed`.
    #[must_use]
    pub const fn failed(&self) -> bool {
        !self.passed || self.err.is_some()
    }

    /// Returns `true` when the check failed and is fatal.
    #[must_use]
    pub const fn is_hard_failure(&self) -> bool {
        self.failed() && matches!(self.severity, CheckSeverity::Hard)
    }
}

/// Checks that failed fatally.
#[must_use]
pub fn hard_failures(checks: &[PrereqCheck]) -> Vec<&PrereqCheck> {
    checks.iter().filter(|check| check.is_hard_failure()).collect()
}

/// Runs the whole battery in order without stopping at the first failure.
pub async fn run_checks(executor: &dyn Executor, family: OsFamily) -> Vec<PrereqCheck> {
    let checks = vec![
        legacy_cleanup(executor).await,
        existing_installation(executor, family).await,
        sudo_check(executor).await,
        cpu_check(executor).await,
        memory_check(executor).await,
        disk_check(executor).await,
        port_check(executor).await,
    ];
    for check in &checks {
        if check.failed() {
            warn!(
                host = executor.target(),
                check = check.name,
                error = check.err.as_deref().unwrap_or_default(),
                "prerequisite check failed"
            );
        } else {
            info!(host = executor.target(), check = check.name, "prerequisite check passed");
        }
    }
    checks
}

fn command_error(err: &ExecutorError) -> String {
    let stderr = err.stderr().trim();
    if stderr.is_empty() {
        err.to_string()
    } else {
        stderr.to_owned()
    }
}

async fn legacy_cleanup(executor: &dyn Executor) -> PrereqCheck {
    let result = executor
        .run("bash", &["-c", LEGACY_CLEANUP])
        .await
        .map_err(|err| command_error(&err));
    PrereqCheck::from_result("LegacyCleanup", CheckSeverity::Soft, result)
}

/// Lists installed `pf9-*` packages on the target.
///
/// # Errors
///
/// Returns the executor error when the package database cannot be queried.
pub async fn installed_packages(
    executor: &dyn Executor,
    family: OsFamily,
) -> Result<Vec<String>, ExecutorError> {
    let output = match family {
        OsFamily::Debian => executor.run_with_stdout("bash", &["-c", DEBIAN_PACKAGES]).await?,
        OsFamily::Rhel => executor.run_with_stdout("rpm", &["-qa", "pf9-*"]).await?,
    };
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

async fn existing_installation(executor: &dyn Executor, family: OsFamily) -> PrereqCheck {
    let result = match installed_packages(executor, family).await {
        Ok(packages) if packages.is_empty() => Ok(()),
        Ok(packages) => Err(format!(
            "platform packages already installed: {}",
            packages.join(", ")
        )),
        Err(err) => Err(command_error(&err)),
    };
    PrereqCheck::from_result("ExistingInstallation", CheckSeverity::Hard, result)
}

async fn sudo_check(executor: &dyn Executor) -> PrereqCheck {
    let result = match executor.run_with_stdout("id", &["-u"]).await {
        Ok(uid) if uid.trim() == "0" => Ok(()),
        Ok(uid) => Err(format!("commands run as uid {}, not root", uid.trim())),
        Err(err) => Err(command_error(&err)),
    };
    PrereqCheck::from_result("SudoCheck", CheckSeverity::Hard, result)
}

async fn getconf(executor: &dyn Executor, variable: &str) -> Result<u64, String> {
    let output = executor
        .run_with_stdout("getconf", &[variable])
        .await
        .map_err(|err| command_error(&err))?;
    output
        .trim()
        .parse()
        .map_err(|_| format!("unexpected {variable} value {:?}", output.trim()))
}

async fn cpu_check(executor: &dyn Executor) -> PrereqCheck {
    let result = getconf(executor, "_NPROCESSORS_ONLN").await.and_then(|cpus| {
        if cpus >= u64::from(MIN_CPUS) {
            Ok(())
        } else {
            Err(format!("{cpus} CPU(s) online, {MIN_CPUS} required"))
        }
    });
    PrereqCheck::from_result("CPUCheck", CheckSeverity::Hard, result)
}

/// Total memory in GiB, rounded up from whole MiB.
const fn memory_gib(pages: u64, page_size: u64) -> u64 {
    let mib = pages.saturating_mul(page_size) >> 20;
    mib.div_ceil(1024)
}

async fn memory_check(executor: &dyn Executor) -> PrereqCheck {
    let result = async {
        let pages = getconf(executor, "_PHYS_PAGES").await?;
        let page_size = getconf(executor, "PAGE_SIZE").await?;
        let gib = memory_gib(pages, page_size);
        if gib >= MIN_MEMORY_GIB {
            Ok(())
        } else {
            Err(format!("{gib} GiB of memory, {MIN_MEMORY_GIB} GiB required"))
        }
    }
    .await;
    PrereqCheck::from_result("MemoryCheck", CheckSeverity::Hard, result)
}

/// Parses `df -k --output=size,avail` into `(total_kib, available_kib)`.
fn parse_df(output: &str) -> Option<(u64, u64)> {
    let line = output.lines().skip(1).find(|line| !line.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    let total = fields.next()?.parse().ok()?;
    let available = fields.next()?.parse().ok()?;
    Some((total, available))
}

async fn disk_check(executor: &dyn Executor) -> PrereqCheck {
    let result = match executor
        .run_with_stdout("df", &["-k", "--output=size,avail", "."])
        .await
    {
        Ok(output) => match parse_df(&output) {
            Some((total, available)) => {
                let mut problems = Vec::new();
                if total < MIN_DISK_TOTAL_GIB * KIB_PER_GIB {
                    problems.push(format!("total disk below {MIN_DISK_TOTAL_GIB} GiB"));
                }
                if available < MIN_DISK_FREE_GIB * KIB_PER_GIB {
                    problems.push(format!("free disk below {MIN_DISK_FREE_GIB} GiB"));
                }
                if problems.is_empty() {
                    Ok(())
                } else {
                    Err(problems.join("; "))
                }
            }
            None => Err(format!("unexpected df output {:?}", output.trim())),
        },
        Err(err) => Err(command_error(&err)),
    };
    PrereqCheck::from_result("DiskSpaceCheck", CheckSeverity::Hard, result)
}

/// Ports from `REQUIRED_PORTS` found among `host:port` listening addresses.
fn occupied_ports(addresses: &str) -> BTreeSet<u16> {
    addresses
        .lines()
        .filter_map(|address| address.trim().rsplit_once(':'))
        .filter_map(|(_, port)| port.parse::<u16>().ok())
        .filter(|port| REQUIRED_PORTS.contains(port))
        .collect()
}

async fn port_check(executor: &dyn Executor) -> PrereqCheck {
    let result = match executor
        .run_with_stdout("bash", &["-c", LISTENING_ADDRESSES])
        .await
    {
        Ok(output) => {
            let busy = occupied_ports(&output);
            if busy.is_empty() {
                Ok(())
            } else {
                let list: Vec<String> = busy.iter().map(u16::to_string).collect();
                Err(format!("ports already in use: {}", list.join(", ")))
            }
        }
        Err(err) => Err(command_error(&err)),
    };
    PrereqCheck::from_result("PortCheck", CheckSeverity::Hard, result)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{memory_gib, occupied_ports, parse_df};

    #[rstest]
    #[case(3_145_728, 4096, 12)]
    #[case(3_000_000, 4096, 12)]
    #[case(2_883_584, 4096, 11)]
    #[case(0, 4096, 0)]
    fn memory_rounds_up_to_whole_gib(#[case] pages: u64, #[case] size: u64, #[case] gib: u64) {
        assert_eq!(memory_gib(pages, size), gib);
    }

    #[test]
    fn df_output_is_parsed_in_kib() {
        let output = "  1K-blocks    Avail\n 41152736 20576368\n";
        assert_eq!(parse_df(output), Some((41_152_736, 20_576_368)));
        assert_eq!(parse_df("1K-blocks Avail\n"), None);
    }

    #[test]
    fn listening_ports_are_matched_against_required_set() {
        let output = "Local\n0.0.0.0:22\n127.0.0.1:2379\n:::10250\n[::]:8080\nAddress\n";
        let busy: Vec<u16> = occupied_ports(output).into_iter().collect();
        assert_eq!(busy, vec![2379, 10250]);
    }
}
