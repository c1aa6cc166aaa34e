//! Unit tests for OS detection and the prerequisite battery.

use rstest::rstest;

use super::{
    CheckSeverity, OsFamily, OsRelease, ProbeError, classify, detect_os, hard_failures,
    installed_packages, run_checks,
};
use crate::test_support::ScriptedExecutor;

const CENTOS_7: &str = "NAME=\"CentOS Linux\"\nID=\"centos\"\nVERSION_ID=\"7\"\n";

fn release(id: &str, version: &str) -> OsRelease {
    OsRelease {
        id: id.to_owned(),
        version_id: version.to_owned(),
        pretty_name: String::new(),
    }
}

#[test]
fn os_release_strips_quotes_and_lowercases_id() {
    let parsed = OsRelease::parse("ID=\"Ubuntu\"\nVERSION_ID='22.04'\nPRETTY_NAME=\"Ubuntu 22.04 LTS\"\n# comment\n");
    assert_eq!(parsed.id, "ubuntu");
    assert_eq!(parsed.version_id, "22.04");
    assert_eq!(parsed.pretty_name, "Ubuntu 22.04 LTS");
}

#[rstest]
#[case("ubuntu", "16.04", None, OsFamily::Debian)]
#[case("ubuntu", "22.04", None, OsFamily::Debian)]
#[case("centos", "7", Some("CentOS Linux release 7.9.2009 (Core)"), OsFamily::Rhel)]
#[case("rhel", "8.4", None, OsFamily::Rhel)]
fn supported_releases(
    #[case] id: &str,
    #[case] version: &str,
    #[case] redhat: Option<&str>,
    #[case] family: OsFamily,
) {
    let info = classify(&release(id, version), redhat)
        .unwrap_or_else(|err| panic!("{id} {version} should be supported: {err}"));
    assert_eq!(info.family, family);
}

#[rstest]
#[case("ubuntu", "14.04", None)]
#[case("centos", "7", Some("CentOS Linux release 7.4.1708 (Core)"))]
#[case("debian", "11", None)]
#[case("ubuntu", "", None)]
fn unsupported_releases(#[case] id: &str, #[case] version: &str, #[case] redhat: Option<&str>) {
    let err = classify(&release(id, version), redhat).err();
    assert!(
        matches!(&err, Some(ProbeError::UnsupportedOs { id: found, .. }) if found == id),
        "expected UnsupportedOs for {id} {version}, got {err:?}"
    );
}

#[test]
fn installer_flavour_follows_family() {
    assert_eq!(OsFamily::Debian.installer_flavour(), "debian");
    assert_eq!(OsFamily::Rhel.installer_flavour(), "redhat");
}

#[tokio::test]
async fn detect_os_reads_redhat_release_for_centos() {
    let executor = ScriptedExecutor::local()
        .on("cat /etc/os-release", CENTOS_7)
        .on("cat /etc/redhat-release", "CentOS Linux release 7.9.2009 (Core)\n");

    let info = detect_os(&executor)
        .await
        .unwrap_or_else(|err| panic!("centos should be detected: {err}"));

    assert_eq!(info.family, OsFamily::Rhel);
    assert_eq!(info.version, "7.9.2009");
    assert_eq!(
        executor.commands(),
        ["cat /etc/os-release", "cat /etc/redhat-release"]
    );
}

#[tokio::test]
async fn detect_os_reports_unreadable_release_file() {
    let executor = ScriptedExecutor::local().exit("cat /etc/os-release", 1, "No such file or directory");

    let err = detect_os(&executor).await.err();

    assert!(matches!(err, Some(ProbeError::Command { .. })), "got {err:?}");
}

#[tokio::test]
async fn healthy_host_passes_every_check_in_order() {
    let executor = ScriptedExecutor::local().healthy_ubuntu();

    let checks = run_checks(&executor, OsFamily::Debian).await;

    let names: Vec<&str> = checks.iter().map(|check| check.name).collect();
    assert_eq!(
        names,
        [
            "LegacyCleanup",
            "ExistingInstallation",
            "SudoCheck",
            "CPUCheck",
            "MemoryCheck",
            "DiskSpaceCheck",
            "PortCheck",
        ]
    );
    assert!(checks.iter().all(|check| !check.failed()), "{checks:?}");
}

#[tokio::test]
async fn failed_legacy_cleanup_is_soft() {
    let executor = ScriptedExecutor::local()
        .healthy_ubuntu()
        .exit("bash -c rm -rf /usr/bin/pf9ctl", 1, "Permission denied");

    let checks = run_checks(&executor, OsFamily::Debian).await;

    let cleanup = checks
        .iter()
        .find(|check| check.name == "LegacyCleanup")
        .unwrap_or_else(|| panic!("LegacyCleanup missing"));
    assert!(cleanup.failed());
    assert_eq!(cleanup.severity, CheckSeverity::Soft);
    assert_eq!(cleanup.err.as_deref(), Some("Permission denied"));
    assert!(hard_failures(&checks).is_empty());
}

#[tokio::test]
async fn non_root_and_busy_ports_are_hard_failures() {
    let executor = ScriptedExecutor::local()
        .healthy_ubuntu()
        .on("id -u", "1000\n")
        .on("bash -c netstat", "Local\n0.0.0.0:443\n127.0.0.1:10250\n");

    let checks = run_checks(&executor, OsFamily::Debian).await;

    let failed: Vec<&str> = hard_failures(&checks).iter().map(|check| check.name).collect();
    assert_eq!(failed, ["SudoCheck", "PortCheck"]);
    let ports = checks
        .iter()
        .find(|check| check.name == "PortCheck")
        .and_then(|check| check.err.clone());
    assert_eq!(ports.as_deref(), Some("ports already in use: 443, 10250"));
}

#[tokio::test]
async fn existing_packages_block_preparation() {
    let executor = ScriptedExecutor::local()
        .healthy_ubuntu()
        .on("bash -c dpkg -l", "pf9-hostagent\npf9-comms\n");

    let checks = run_checks(&executor, OsFamily::Debian).await;

    let existing = checks
        .iter()
        .find(|check| check.name == "ExistingInstallation")
        .unwrap_or_else(|| panic!("ExistingInstallation missing"));
    assert!(existing.is_hard_failure());
    assert_eq!(
        existing.err.as_deref(),
        Some("platform packages already installed: pf9-hostagent, pf9-comms")
    );
}

#[tokio::test]
async fn rhel_packages_come_from_rpm() {
    let executor = ScriptedExecutor::local().on("rpm -qa", "pf9-hostagent-5.4.0.x86_64\n\n");

    let packages = installed_packages(&executor, OsFamily::Rhel)
        .await
        .unwrap_or_else(|err| panic!("rpm query failed: {err}"));

    assert_eq!(packages, ["pf9-hostagent-5.4.0.x86_64"]);
    assert_eq!(executor.commands(), ["rpm -qa pf9-*"]);
}
