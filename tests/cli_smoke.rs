//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn temp_home() -> TempDir {
    tempfile::tempdir().unwrap_or_else(|err| panic!("temp home: {err}"))
}

#[test]
fn help_lists_the_node_commands() {
    let mut cmd = cargo_bin_cmd!("pf9ctl");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("prep-node").and(predicate::str::contains("set-proxy")));
}

#[test]
fn config_get_without_stored_config_exits_with_config_code() {
    let home = temp_home();
    let mut cmd = cargo_bin_cmd!("pf9ctl");
    cmd.env("HOME", home.path())
        .args(["config", "get", "--no-prompt"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no configuration found"));
}

#[test]
fn remote_prep_without_credentials_fails_before_any_network_call() {
    let home = temp_home();
    let mut cmd = cargo_bin_cmd!("pf9ctl");
    cmd.env("HOME", home.path())
        .args(["prep-node", "--ips", "10.0.0.5", "--no-prompt"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("a user is required for remote nodes"));
}

#[test]
fn attach_requires_a_cluster_name_or_id() {
    let mut cmd = cargo_bin_cmd!("pf9ctl");
    cmd.args(["cluster", "attach-node", "--worker-ip", "10.0.0.5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn password_and_key_conflict() {
    let mut cmd = cargo_bin_cmd!("pf9ctl");
    cmd.args(["check-node", "-i", "10.0.0.5", "-u", "ubuntu", "-p", "pw", "-s", "/tmp/key"])
        .assert()
        .code(2);
}
