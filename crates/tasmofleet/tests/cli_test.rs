//! Integration tests for the `tasmofleet` binary.
//!
//! Every run is pointed at a throwaway config path so tests never touch
//! the user's real configuration or network.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

fn tasmofleet_cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tasmofleet");
    cmd.env("HOME", "/tmp/tasmofleet-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/tasmofleet-cli-test-nonexistent")
        .env_remove("TASMOFLEET_CONFIG")
        .env_remove("TASMOFLEET_PUBSUB__HOST")
        .env_remove("TASMOFLEET_NETWORK__FIRST")
        .env_remove("TASMOFLEET_NETWORK__LAST")
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config);
    cmd
}

const SEED: &str = r#"
templates:
  basic:
    definition: '{"NAME":"Sonoff Basic","GPIO":[17,255,255,255,0,0,0,0,21,56,0,0,0],"FLAG":0,"BASE":1}'
devices:
  common:
    setupCommands: SetOption59 1
  kitchen:
    mac: dc:4f:22:00:00:01
    templateName: basic
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("tasmofleet");
    cmd.env("HOME", dir.path());
    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    tasmofleet_cmd(&dir.path().join("config.toml"))
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("scan"))
                .and(predicate::str::contains("check-seed")),
        );
}

// ── check-seed ──────────────────────────────────────────────────────

#[test]
fn test_check_seed_counts_records() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed.yaml");
    std::fs::write(&seed, SEED).unwrap();

    tasmofleet_cmd(&dir.path().join("config.toml"))
        .arg("check-seed")
        .arg(&seed)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 templates, 2 device configurations"));
}

#[test]
fn test_check_seed_rejects_unknown_template() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed.yaml");
    std::fs::write(
        &seed,
        "templates: {}\ndevices:\n  porch:\n    mac: aa:bb:cc:dd:ee:ff\n    templateName: nope\n",
    )
    .unwrap();

    tasmofleet_cmd(&dir.path().join("config.toml"))
        .arg("check-seed")
        .arg(&seed)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope"));
}

// ── scan ────────────────────────────────────────────────────────────

#[test]
fn test_scan_emulated_fleet_prints_devices() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[network]\nsubnet = \"10.9.0.0\"\nfirst = 100\nlast = 110\n",
    )
    .unwrap();

    tasmofleet_cmd(&config)
        .args(["scan", "--emulate", "2"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("dc:4f:22:00:00:01")
                .and(predicate::str::contains("10.9.0.102"))
                .and(predicate::str::contains("tasmota_000002")),
        );
}

#[test]
fn test_invalid_range_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[network]\nfirst = 200\nlast = 100\n").unwrap();

    tasmofleet_cmd(&config)
        .args(["scan", "--emulate", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("network.first"));
}

#[test]
fn test_emulate_zero_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    tasmofleet_cmd(&dir.path().join("config.toml"))
        .args(["run", "--emulate", "0"])
        .assert()
        .failure();
}
