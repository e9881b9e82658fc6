//! Integration tests for the rstore CLI
//!
//! These tests invoke the actual rstore-cli binary and verify:
//! - Exit codes (0 = success, 1 = verification failure, 2 = error)
//! - stdout/stderr output
//! - JSON output format

use std::path::PathBuf;
use std::process::Command;

// ── Helpers ───────────────────────────────────────────────

fn rstore_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rstore-cli"))
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run_rstore(args: &[&str]) -> std::process::Output {
    Command::new(rstore_bin())
        .args(args)
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute rstore-cli")
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("should be valid JSON")
}

// ── Version ───────────────────────────────────────────────

#[test]
fn test_version_command() {
    let output = run_rstore(&["version"]);
    assert!(output.status.success(), "version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("rstore"), "should contain 'rstore'");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "should contain version");
}

#[test]
fn test_version_flag() {
    let output = run_rstore(&["--version"]);
    assert!(output.status.success(), "--version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "should contain version");
}

// ── Check ─────────────────────────────────────────────────

#[test]
fn test_check_valid_manifest() {
    let output = run_rstore(&["check", &fixture("valid.json")]);
    assert!(output.status.success(), "valid manifest should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("valid"), "should mention valid");
    assert!(stdout.contains("3 function(s)"), "should count functions: {}", stdout);
}

#[test]
fn test_check_undeclared_access() {
    let output = run_rstore(&["check", &fixture("undeclared.json")]);
    assert_eq!(output.status.code(), Some(1), "undeclared access should exit 1");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("undeclared-access"), "should name the diagnostic: {}", stderr);
    assert!(stderr.contains("0x1::counter::bump"), "should name the function");
    assert!(stderr.contains("0x1::counter::Counter"), "should name the type");
}

#[test]
fn test_check_json_output() {
    let output = run_rstore(&["check", "--json", &fixture("valid.json")]);
    assert!(output.status.success(), "valid manifest --json should exit 0");
    let json = stdout_json(&output);
    assert_eq!(json["valid"], true);
    assert_eq!(json["errors"], 0);
    assert_eq!(json["functions"].as_array().map(Vec::len), Some(3));
}

#[test]
fn test_check_json_invalid() {
    let output = run_rstore(&["check", "--json", &fixture("undeclared.json")]);
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["valid"], false);
    assert_eq!(json["errors"], 1);
    let diagnostic = &json["diagnostics"][0];
    assert_eq!(diagnostic["kind"], "undeclared_access");
    assert_eq!(diagnostic["function"], "0x1::counter::bump");
    assert_eq!(diagnostic["missing"], "0x1::counter::Counter");
}

#[test]
fn test_check_policy_from_config() {
    let strict = run_rstore(&["check", &fixture("publish_only.json")]);
    assert_eq!(strict.status.code(), Some(1), "strict policy covers move_to and exists");

    let relaxed = run_rstore(&[
        "check",
        "--config",
        &fixture("move_compatible.json"),
        &fixture("publish_only.json"),
    ]);
    assert!(relaxed.status.success(), "move_compatible exempts move_to and exists");
}

#[test]
fn test_check_invalid_config() {
    let output = run_rstore(&[
        "check",
        "--config",
        &fixture("bad_config.json"),
        &fixture("valid.json"),
    ]);
    assert_eq!(output.status.code(), Some(2), "bad config should exit 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("max_call_depth"), "should explain the problem: {}", stderr);
}

#[test]
fn test_check_nonexistent_file() {
    let output = run_rstore(&["check", "nonexistent.json"]);
    assert_eq!(output.status.code(), Some(2), "missing file should exit 2");
}

#[test]
fn test_check_malformed_manifest() {
    let output = run_rstore(&["check", &fixture("malformed.json")]);
    assert_eq!(output.status.code(), Some(2), "malformed manifest should exit 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid manifest"));
}

// ── Hash ──────────────────────────────────────────────────

#[test]
fn test_hash_output_format() {
    let output = run_rstore(&["hash", &fixture("valid.json")]);
    assert!(output.status.success(), "hash should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one line per module");
    let (hash, module) = line.split_once("  ").expect("hash and module id");
    assert_eq!(hash.len(), 64, "SHA-256 hex should be 64 chars");
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(module, "0x1::counter");
}

#[test]
fn test_hash_determinism() {
    let first = run_rstore(&["hash", &fixture("valid.json")]);
    for i in 0..10 {
        let output = run_rstore(&["hash", &fixture("valid.json")]);
        assert_eq!(output.stdout, first.stdout, "Non-determinism at iteration {}", i);
    }
}

#[test]
fn test_hash_nonexistent_file() {
    let output = run_rstore(&["hash", "nonexistent.json"]);
    assert_eq!(output.status.code(), Some(2));
}

// ── Usage ─────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    let output = run_rstore(&["frobnicate"]);
    assert_eq!(output.status.code(), Some(2), "clap usage errors exit 2");
}
