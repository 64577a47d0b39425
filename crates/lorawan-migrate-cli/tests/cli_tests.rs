//! CLI integration tests for lorawan-migrate.
//!
//! These tests verify argument parsing, help output, exit codes, and the
//! commands that work against the local record store alone.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;

/// Get a command for the lorawan-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("lorawan-migrate").unwrap()
}

/// Write a valid config whose record store lives in `dir`.
///
/// The backend URLs point at a closed local port; nothing in these tests
/// reaches them.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    let yaml = format!(
        r#"
source:
  name: legacy
  variant: rest
  url: http://127.0.0.1:9
  api_token: token-a
  tenant_id: "1"
target:
  name: cloud
  variant: rpc
  url: http://127.0.0.1:9/api
  api_token: token-b
  tenant_id: tenant-b
store:
  path: {}
migration:
  batch_pause_ms: 0
"#,
        dir.join("records.db").display()
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dev-eui"))
        .stdout(predicate::str::contains("--all"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--pause-ms"));
}

#[test]
fn test_delete_subcommand_help() {
    cmd()
        .args(["delete", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dev-eui"))
        .stdout(predicate::str::contains("--from"))
        .stdout(predicate::str::contains("[default: target]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("lorawan-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // Missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_empty_config_exits_with_code_2() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  name: legacy").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_bad_url_scheme_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());
    let yaml = std::fs::read_to_string(&path)
        .unwrap()
        .replace("http://127.0.0.1:9/api", "ftp://127.0.0.1:9/api");
    std::fs::write(&path, yaml).unwrap();

    cmd()
        .args(["--config", path.to_str().unwrap(), "history"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("target.url"));
}

#[test]
fn test_zero_batch_size_override_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());

    cmd()
        .args([
            "--config",
            path.to_str().unwrap(),
            "migrate",
            "--all",
            "--batch-size",
            "0",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("batch_size"));
}

// =============================================================================
// Argument Parsing Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_migrate_requires_selection() {
    cmd().args(["migrate"]).assert().failure();
}

#[test]
fn test_migrate_all_conflicts_with_dev_eui() {
    cmd()
        .args(["migrate", "--all", "--dev-eui", "0102030405060708"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_dev_eui_is_rejected() {
    cmd()
        .args(["delete", "--dev-eui", "not-an-eui"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not-an-eui"));
}

// =============================================================================
// Record Store Tests
// =============================================================================

#[test]
fn test_history_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());

    cmd()
        .args(["--config", path.to_str().unwrap(), "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No migration attempts recorded."));
}

#[test]
fn test_migrating_unknown_device_is_recorded_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());
    let config = path.to_str().unwrap();

    // Per-device failures do not fail the run.
    cmd()
        .args([
            "--config",
            config,
            "--output-json",
            "migrate",
            "--dev-eui",
            "0102030405060708",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failed\": 1"))
        .stdout(predicate::str::contains("not found locally"));

    cmd()
        .args(["--config", config, "history", "--dev-eui", "0102030405060708"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0102030405060708"))
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("not found locally"));
}

#[test]
fn test_migrate_all_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());

    cmd()
        .args(["--config", path.to_str().unwrap(), "--output-json", "migrate", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 0"));
}
