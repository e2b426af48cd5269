//! CLI smoke tests - verify the commands that need no provider or network.
//!
//! These tests run the compiled binary and verify exit codes and output.

use std::path::PathBuf;
use std::process::Command;

/// Helper: run agentmesh with given args and return (exit_code, stdout, stderr).
fn run_cli(args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_agentmesh");
    let output = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "error") // suppress tracing noise
        .output()
        .expect("failed to execute agentmesh binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn demo(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
        .to_string_lossy()
        .to_string()
}

/// A config path that does not exist, so the user's own config is ignored.
fn no_config(dir: &tempfile::TempDir) -> String {
    dir.path().join("config.json").to_string_lossy().to_string()
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let (code, stdout, _stderr) = run_cli(&[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("agentmesh"));
}

#[test]
fn cli_help_lists_commands() {
    let (code, stdout, _stderr) = run_cli(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("daemon"));
}

#[test]
fn cli_version_command() {
    let (code, stdout, _stderr) = run_cli(&["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("agentmesh"));
    assert!(stdout.contains('.'));
}

#[test]
fn cli_unknown_command_fails() {
    let (code, _stdout, stderr) = run_cli(&["frobnicate"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = no_config(&dir);
    let (code, stdout, _stderr) = run_cli(&["--config", &path, "config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No config file found"));
}

#[test]
fn cli_config_check_reports_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{"llm": {"max_retriez": 3, "max_concurrent_requests": 0}}"#,
    )
    .unwrap();
    let (code, stdout, _stderr) = run_cli(&["--config", path.to_str().unwrap(), "config", "check"]);
    assert_eq!(code, 1);
    assert!(stdout.contains("llm.max_retriez"));
    assert!(stdout.contains("llm.max_concurrent_requests"));
}

#[test]
fn cli_config_show_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = no_config(&dir);
    let (code, stdout, _stderr) = run_cli(&["--config", &path, "config", "show"]);
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["llm"]["max_concurrent_requests"], 3);
    assert_eq!(value["agents"]["max_tool_rounds"], 200);
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn cli_run_demo_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = no_config(&dir);
    let scenario = demo("delegation.json");
    let (code, stdout, stderr) = run_cli(&["--config", &path, "run", "--scenario", &scenario]);
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("[lead -> user] The project depends on tokio, serde and tracing."));
    assert!(stdout.contains("Run finished: Completed"));
}

#[test]
fn cli_run_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = no_config(&dir);
    let scenario = demo("delegation.json");
    let (code, stdout, _stderr) = run_cli(&[
        "--config", &path, "run", "--scenario", &scenario, "--json",
    ]);
    assert_eq!(code, 0);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.last().unwrap()["kind"], "report");
    assert_eq!(lines.last().unwrap()["run"]["end"], "completed");
    assert!(lines.iter().any(|l| l["kind"] == "outbound" && l["from"] == "lead"));
}

#[test]
fn cli_run_missing_scenario_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = no_config(&dir);
    let missing = dir.path().join("nope.json");
    let (code, _stdout, stderr) = run_cli(&[
        "--config",
        &path,
        "run",
        "--scenario",
        missing.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Failed to read scenario"));
}
