//! Operator-facing result lines.
//!
//! Every terminal step prints one check or cross line; multi-host commands
//! add a per-host table. Output goes to any [`Write`] so tests can capture it.

use std::io::{self, Write};

use colored::Colorize;

use crate::error::Pf9Error;
use crate::orchestrator::{HostReport, HostStatus};
use crate::platform::{CheckSeverity, PrereqCheck};

const PASS: &str = "✓";
const FAIL: &str = "✗";
const WARN: &str = "!";

/// Writes a success line.
///
/// # Errors
///
/// Returns the write error.
pub fn success(out: &mut impl Write, message: &str) -> io::Result<()> {
    writeln!(out, "{} {message}", PASS.green())
}

/// Writes a failure line with the error's summary.
///
/// # Errors
///
/// Returns the write error.
pub fn failure(out: &mut impl Write, err: &Pf9Error) -> io::Result<()> {
    writeln!(out, "{} {err}", FAIL.red())?;
    if let Pf9Error::PrereqFailed { checks } = err {
        checks_table(out, checks)?;
    }
    Ok(())
}

/// Writes one line per prerequisite check.
///
/// # Errors
///
/// Returns the write error.
pub fn checks_table(out: &mut impl Write, checks: &[PrereqCheck]) -> io::Result<()> {
    for check in checks {
        let detail = check.err.as_deref().unwrap_or_default();
        match (check.passed, check.severity) {
            (true, _) => writeln!(out, "  {} {}", PASS.green(), check.name)?,
            (false, CheckSeverity::Soft) => {
                writeln!(out, "  {} {}: {detail}", WARN.yellow(), check.name)?;
            }
            (false, CheckSeverity::Hard) => {
                writeln!(out, "  {} {}: {detail}", FAIL.red(), check.name)?;
            }
        }
    }
    Ok(())
}

/// Writes the per-host result table.
///
/// # Errors
///
/// Returns the write error.
pub fn host_table(out: &mut impl Write, reports: &[HostReport]) -> io::Result<()> {
    let width = reports
        .iter()
        .map(|report| report.host.len())
        .max()
        .unwrap_or_default();
    for report in reports {
        let host = format!("{:<width$}", report.host);
        match &report.status {
            HostStatus::Succeeded(detail) => writeln!(out, "{} {host}  {detail}", PASS.green())?,
            HostStatus::Skipped(detail) => writeln!(out, "{} {host}  {detail}", WARN.yellow())?,
            HostStatus::Failed(err) => writeln!(out, "{} {host}  {err}", FAIL.red())?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{checks_table, failure, host_table, success};
    use crate::error::Pf9Error;
    use crate::orchestrator::{HostReport, HostStatus};
    use crate::platform::{CheckSeverity, PrereqCheck};

    fn render(write: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        write(&mut buf).unwrap_or_else(|err| panic!("write failed: {err}"));
        String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"))
    }

    fn check(name: &'static str, err: Option<&str>, severity: CheckSeverity) -> PrereqCheck {
        PrereqCheck {
            name,
            passed: err.is_none(),
            err: err.map(str::to_owned),
            severity,
        }
    }

    #[test]
    fn success_line_has_a_check_mark() {
        let out = render(|buf| success(buf, "Node added to resmgr successfully"));
        assert_eq!(out, "✓ Node added to resmgr successfully\n");
    }

    #[test]
    fn prereq_failure_lists_every_check() {
        let err = Pf9Error::PrereqFailed {
            checks: vec![
                check("SudoCheck", None, CheckSeverity::Hard),
                check("LegacyCleanup", Some("permission denied"), CheckSeverity::Soft),
                check("CPUCheck", Some("1 CPU(s) online, 2 required"), CheckSeverity::Hard),
            ],
        };
        let out = render(|buf| failure(buf, &err));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "✗ prerequisite checks failed: CPUCheck",
                "  ✓ SudoCheck",
                "  ! LegacyCleanup: permission denied",
                "  ✗ CPUCheck: 1 CPU(s) online, 2 required",
            ]
        );
    }

    #[test]
    fn host_table_aligns_hosts() {
        let reports = vec![
            HostReport::new("10.0.0.5", HostStatus::Succeeded(String::from("xyz-999"))),
            HostReport::new("10.0.0.10", HostStatus::Skipped(String::from("not attached"))),
        ];
        let out = render(|buf| host_table(buf, &reports));
        assert_eq!(out, "✓ 10.0.0.5   xyz-999\n! 10.0.0.10  not attached\n");
    }

    #[test]
    fn checks_table_handles_empty_input() {
        assert!(render(|buf| checks_table(buf, &[])).is_empty());
    }
}
