//! Integration tests for CLI commands.
//!
//! Covers the commands that can run end-to-end without a live Postgres
//! cluster: scaffolding, config inspection, and validation. The
//! partition-moving commands (`cluster move-partition`, `cluster
//! create-replica`, `cluster set-replication-level`) need a real catalog
//! connection and are exercised by `shardlord-engine`'s own test suite
//! instead.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Init Command
// ============================================================================

#[test]
fn init_creates_required_files() {
    let temp = TempDir::new().unwrap();
    let project_dir = temp.path().join("my-cluster");

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", project_dir.to_str().unwrap()])
        .assert()
        .success();

    assert!(project_dir.exists());
    assert!(project_dir.join("shardlord.toml").exists());
    assert!(project_dir.join(".gitignore").exists());
}

#[test]
fn init_twice_fails() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn init_current_directory_works() {
    let temp = TempDir::new().unwrap();
    std::env::set_current_dir(&temp).unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .arg("init")
        .assert()
        .success();

    assert!(temp.path().join("shardlord.toml").exists());
}

// ============================================================================
// Config Commands
// ============================================================================

#[test]
fn config_show_works_in_initialized_project() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["config", "show", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn config_show_toml_format_round_trips_defaults() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args([
            "config",
            "show",
            "--project",
            temp.path().to_str().unwrap(),
            "--format",
            "toml",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[engine]"));
}

#[test]
fn config_show_json_format_works() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args([
            "config",
            "show",
            "--project",
            temp.path().to_str().unwrap(),
            "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("engine"));
}

#[test]
fn config_validate_works_in_initialized_project() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args([
            "config",
            "validate",
            "--project",
            temp.path().to_str().unwrap(),
        ])
        .assert()
        .success();
}

#[test]
fn config_validate_in_nonexistent_project_fails() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["config", "validate", "--project", "/nonexistent/project"])
        .assert()
        .failure();
}

// ============================================================================
// Cluster Commands That Work Without a Catalog Connection
// ============================================================================

#[test]
fn cluster_status_works_in_initialized_project() {
    let temp = TempDir::new().unwrap();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["init", temp.path().to_str().unwrap()])
        .assert()
        .success();

    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "status", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cluster Status"));
}

#[test]
fn cluster_status_in_nonexistent_project_fails() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "status", "--project", "/nonexistent/project"])
        .assert()
        .failure();
}

#[test]
fn add_node_reports_out_of_scope() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "add-node", "7", "host=db7 dbname=shard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not implemented in this engine"));
}

#[test]
fn remove_node_reports_out_of_scope() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "remove-node", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not implemented in this engine"));
}

#[test]
fn partition_table_reports_out_of_scope() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "partition-table", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not implemented in this engine"));
}

#[test]
fn rebalance_reports_out_of_scope() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .args(["cluster", "rebalance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not implemented in this engine"));
}

// ============================================================================
// Version
// ============================================================================

#[test]
fn version_command_prints_build_info() {
    Command::cargo_bin("shardlord")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build info"));
}
