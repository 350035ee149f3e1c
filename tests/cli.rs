//! End-to-end tests for the `oq` binary.

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

/// A command isolated from the user's home, config and environment.
fn oq(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("oq").unwrap();
    cmd.env("HOME", home)
        .env("OQ_DB", home.join("queue.db"))
        .env_remove("OQ_ENDPOINT")
        .env_remove("OQ_HEALTH_URL")
        .env_remove("OQ_AUTH_TOKEN")
        .env_remove("OQ_USER")
        .env_remove("OQ_TEST_DB")
        .env_remove("RUST_LOG")
        .arg("--json");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn stderr_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stderr).unwrap()
}

#[test]
fn test_version_reports_schema() {
    let home = TempDir::new().unwrap();
    let output = oq(home.path()).arg("version").output().unwrap();

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["schema"].as_i64().unwrap() >= 1);
}

#[test]
fn test_enqueue_list_show_cancel() {
    let home = TempDir::new().unwrap();

    let output = oq(home.path())
        .args(["enqueue", "check-in", r#"{"place":"cafe"}"#])
        .output()
        .unwrap();
    assert!(output.status.success());
    let enqueued = stdout_json(&output);
    let id = enqueued["id"].as_str().unwrap().to_string();
    assert_eq!(enqueued["status"], "pending");
    assert_eq!(enqueued["depth"], 1);

    let output = oq(home.path()).arg("list").output().unwrap();
    assert!(output.status.success());
    let list = stdout_json(&output);
    assert_eq!(list["count"], 1);
    assert_eq!(list["operations"][0]["id"], id.as_str());
    assert_eq!(list["operations"][0]["type"], "check-in");

    let output = oq(home.path()).args(["show", &id]).output().unwrap();
    assert!(output.status.success());
    let shown = stdout_json(&output);
    assert_eq!(shown["payload"]["place"], "cafe");
    assert_eq!(shown["attempt_count"], 0);

    let output = oq(home.path()).args(["cancel", &id]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["cancelled"], true);

    let output = oq(home.path()).args(["show", &id]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stderr_json(&output)["error"]["code"], "OPERATION_NOT_FOUND");
}

#[test]
fn test_list_filters_by_status() {
    let home = TempDir::new().unwrap();
    for ty in ["text-capture", "voice-note"] {
        oq(home.path()).args(["enqueue", ty]).assert().success();
    }

    let output = oq(home.path()).args(["list", "--status", "queued"]).output().unwrap();
    assert_eq!(stdout_json(&output)["count"], 2);

    let output = oq(home.path()).args(["list", "--status", "failed"]).output().unwrap();
    assert_eq!(stdout_json(&output)["count"], 0);
}

#[test]
fn test_unknown_type_is_validation_error() {
    let home = TempDir::new().unwrap();
    let output = oq(home.path())
        .args(["enqueue", "teleport"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    let err = stderr_json(&output);
    assert_eq!(err["error"]["code"], "INVALID_ARGUMENT");
    assert!(err["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown operation type"));
}

#[test]
fn test_invalid_payload_rejected() {
    let home = TempDir::new().unwrap();
    let output = oq(home.path())
        .args(["enqueue", "check-in", "{not json"])
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_status_counts_queue() {
    let home = TempDir::new().unwrap();
    oq(home.path()).args(["enqueue", "photo-capture"]).assert().success();

    let output = oq(home.path()).arg("status").output().unwrap();
    assert!(output.status.success());
    let snapshot = stdout_json(&output);
    assert_eq!(snapshot["available"], true);
    assert_eq!(snapshot["depth"], 1);
    assert_eq!(snapshot["badge"], "1");
    assert_eq!(snapshot["threshold_exceeded"], false);
}

#[test]
fn test_purge_on_fresh_queue() {
    let home = TempDir::new().unwrap();
    let output = oq(home.path()).args(["purge", "--all"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["purged"], 0);
}

#[test]
fn test_sync_without_endpoint_is_config_error() {
    let home = TempDir::new().unwrap();
    oq(home.path()).args(["enqueue", "check-in"]).assert().success();

    let output = oq(home.path()).arg("sync").output().unwrap();
    assert_eq!(output.status.code(), Some(7));
    assert_eq!(stderr_json(&output)["error"]["code"], "CONFIG_ERROR");

    // Nothing was dropped
    let output = oq(home.path()).arg("list").output().unwrap();
    assert_eq!(stdout_json(&output)["count"], 1);
}

#[test]
fn test_completions_generate() {
    let home = TempDir::new().unwrap();
    let output = oq(home.path()).args(["completions", "bash"]).output().unwrap();

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("oq"));
}
