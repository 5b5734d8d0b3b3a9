//! Integration tests for the snapsync binary
//!
//! Only the commands that never reach the btrfs tool are exercised here:
//! target initialization and config handling are plain filesystem work.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn snapsync(args: &[&str], extra: &[&Path]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_snapsync"));
    command.args(args);
    for path in extra {
        command.arg(path);
    }
    command.output().expect("failed to run snapsync")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_init_writes_config() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");

    let output = snapsync(&["init"], &[&dir]);
    assert_success(&output);

    let config = std::fs::read_to_string(dir.join("snapsync.config")).unwrap();
    assert!(config.contains("uuid = "));
    assert!(config.contains("type = \"default\""));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Initialized target"));
}

#[test]
fn test_init_is_stable_across_reruns() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");

    assert_success(&snapsync(&["init"], &[&dir]));
    let first = std::fs::read_to_string(dir.join("snapsync.config")).unwrap();
    assert_success(&snapsync(&["init"], &[&dir]));
    let second = std::fs::read_to_string(dir.join("snapsync.config")).unwrap();

    // The identity is minted once and survives a second init
    assert_eq!(first, second);
}

#[test]
fn test_policy_change_round_trips() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");
    assert_success(&snapsync(&["init"], &[&dir]));

    let mut command = Command::new(env!("CARGO_BIN_EXE_snapsync"));
    command.arg("policy").arg(&dir).args(["timeline", "day", "10", "month", "6"]);
    let output = command.output().unwrap();
    assert_success(&output);

    let config = std::fs::read_to_string(dir.join("snapsync.config")).unwrap();
    assert!(config.contains("type = \"timeline\""));
    assert!(config.contains("day"));
    assert!(config.contains("10"));
}

#[test]
fn test_policy_rejects_unknown_type() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");
    assert_success(&snapsync(&["init"], &[&dir]));

    let mut command = Command::new(env!("CARGO_BIN_EXE_snapsync"));
    command.arg("policy").arg(&dir).arg("ring-buffer");
    let output = command.output().unwrap();
    assert!(!output.status.success());

    // The previous policy stays in force
    let config = std::fs::read_to_string(dir.join("snapsync.config")).unwrap();
    assert!(config.contains("type = \"default\""));
}

#[test]
fn test_cleanup_on_default_policy_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");
    assert_success(&snapsync(&["init"], &[&dir]));

    let output = snapsync(&["cleanup"], &[&dir]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("nothing to do"));
}

#[test]
fn test_destroy_dry_run_keeps_the_target() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("backup");
    assert_success(&snapsync(&["init"], &[&dir]));

    let mut command = Command::new(env!("CARGO_BIN_EXE_snapsync"));
    command.arg("destroy").arg(&dir).arg("--dry-run");
    assert_success(&command.output().unwrap());
    assert!(dir.join("snapsync.config").is_file());

    let mut command = Command::new(env!("CARGO_BIN_EXE_snapsync"));
    command.arg("destroy").arg(&dir);
    assert_success(&command.output().unwrap());
    assert!(!dir.exists());
}

#[test]
fn test_uninitialized_target_is_reported() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("never-initialized");
    std::fs::create_dir(&dir).unwrap();

    let output = snapsync(&["cleanup"], &[&dir]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not initialized"));
}
