//! Command-line surface of the `strata` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn strata() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("strata"));
    cmd.env_remove("STRATA_ROOT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_layer_commands() {
    strata()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("create")
                .and(predicate::str::contains("remove"))
                .and(predicate::str::contains("exists"))
                .and(predicate::str::contains("--storage-opt")),
        );
}

#[test]
fn version_is_printed() {
    strata()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("strata "));
}

#[test]
fn unknown_status_format_is_rejected() {
    strata()
        .args(["status", "--format", "yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn non_btrfs_root_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    if strata::filesystem::is_btrfs(temp.path()).unwrap_or(true) {
        return;
    }

    strata()
        .arg("--root")
        .arg(temp.path())
        .args(["exists", "layer"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not on a btrfs filesystem"));
}

#[test]
fn root_can_come_from_environment() {
    let temp = tempfile::tempdir().unwrap();
    if strata::filesystem::is_btrfs(temp.path()).unwrap_or(true) {
        return;
    }

    strata()
        .env("STRATA_ROOT", temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains(temp.path().to_string_lossy().into_owned()));
}
