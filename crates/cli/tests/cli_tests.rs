//! CLI integration tests

use std::process::{Command, Output};
use tempfile::TempDir;

fn fleetctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetctl"))
        .args(args)
        .env_remove("FLEET_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = fleetctl(&["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Fleet Scheduler"), "Should show app name");
    assert!(stdout.contains("get"), "Should show get command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("bench"), "Should show bench command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = fleetctl(&["--version"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fleetctl"), "Should show binary name");
}

#[test]
fn test_get_help_lists_resources() {
    let output = fleetctl(&["get", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("assignments"));
    assert!(stdout.contains("overflow"));
    assert!(stdout.contains("cycle"));
}

#[test]
fn test_bench_summary_help() {
    let output = fleetctl(&["bench", "summary", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--file"), "Should show file option");
}

#[test]
fn test_bench_summary_json() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("benchmark.csv");
    std::fs::write(
        &file,
        "timestamp,event_type,duration_ms\n\
         1700000000.0,cold,9000.0\n\
         1700000300.0,cold,11000.0\n\
         1700000600.0,prewarm,400.0\n",
    )
    .unwrap();

    let output = fleetctl(&[
        "--format",
        "json",
        "bench",
        "summary",
        "--file",
        file.to_str().unwrap(),
    ]);

    assert!(output.status.success(), "bench summary should succeed");
    let summaries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 2);

    let cold = summaries
        .iter()
        .find(|s| s["event_type"] == "cold")
        .unwrap();
    assert_eq!(cold["count"], 2);
    assert_eq!(cold["mean_ms"], 10000.0);
}

#[test]
fn test_bench_summary_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("missing.csv");

    let output = fleetctl(&["bench", "summary", "--file", file.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_get_assignments_from_api() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/assignments")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"processors":[
                {"processor_id":"p1","machines":["m1","m2"]},
                {"processor_id":"p2","machines":["m3"]}
            ]}"#,
        )
        .create();

    let url = server.url();
    let output = fleetctl(&[
        "--api-url",
        url.as_str(),
        "--format",
        "json",
        "get",
        "assignments",
    ]);

    mock.assert();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["processors"][1]["machines"], serde_json::json!(["m3"]));
}

#[test]
fn test_get_cycle_before_first_cycle() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/autoscaler/last-cycle")
        .with_status(404)
        .with_body(r#"{"error":"no autoscaler cycle completed yet"}"#)
        .create();

    let url = server.url();
    let output = fleetctl(&["--api-url", url.as_str(), "get", "cycle"]);

    mock.assert();
    assert!(output.status.success(), "404 is reported, not an error");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No autoscaler cycle"));
}

#[test]
fn test_overflow_server_error_fails() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api/v1/overflow")
        .with_status(500)
        .with_body(r#"{"error":"boom"}"#)
        .create();

    let url = server.url();
    let output = fleetctl(&["--api-url", url.as_str(), "get", "overflow"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("boom"));
}

#[test]
fn test_invalid_command() {
    let output = fleetctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
}
