//! CLI smoke tests for shipyard.
//!
//! These run the binary against an isolated config and data directory and
//! never reach a real server.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// A shipyard command isolated in `home`.
fn shipyard_cmd(home: &TempDir) -> Command {
  let mut cmd = cargo_bin_cmd!("shipyard");
  cmd
    .env("XDG_CONFIG_HOME", home.path().join("config"))
    .env("XDG_DATA_HOME", home.path().join("data"))
    .env_remove("SHIPYARD_URL")
    .env_remove("SHIPYARD_DIST_URL")
    .env_remove("SHIPYARD_USER")
    .env_remove("SHIPYARD_PASSWORD")
    .env_remove("SHIPYARD_ACCESS_TOKEN")
    .env_remove("RUST_LOG");
  cmd
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("shipyard"));
}

#[test]
fn subcommand_help_works() {
  let home = TempDir::new().unwrap();
  for cmd in &["upload", "download", "env", "publish", "promote", "distribute", "delete-bundle"] {
    shipyard_cmd(&home)
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Argument and configuration errors
// =============================================================================

#[test]
fn build_name_requires_build_number() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .args(["env", "--build-name", "app"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--build-number"));
}

#[test]
fn upload_without_server_url_fails() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .args([
      "upload",
      "--build-name",
      "app",
      "--build-number",
      "1",
      "--repo",
      "libs",
      "--pattern",
      "*.jar",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no server URL configured"));
}

#[test]
fn upload_without_repository_fails() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .args(["upload", "--build-name", "app", "--build-number", "1", "--pattern", "*.jar"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing required argument: repository"));
}

#[test]
fn explicit_missing_config_file_fails() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .args(["--config", "does-not-exist.toml", "env", "--build-name", "a", "--build-number", "1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn distribution_rules_conflict_with_site() {
  let home = TempDir::new().unwrap();
  let rules = home.path().join("rules.json");
  std::fs::write(&rules, r#"{"distribution_rules":[{"site_name":"eu-*"}]}"#).unwrap();
  shipyard_cmd(&home)
    .env("SHIPYARD_DIST_URL", "http://127.0.0.1:9")
    .args(["distribute", "--bundle", "app", "--version", "1.0", "--site", "us-*", "--rules"])
    .arg(&rules)
    .assert()
    .failure()
    .stderr(predicate::str::contains("conflicting arguments"));
}

// =============================================================================
// Offline build-info accumulation
// =============================================================================

#[test]
#[serial]
fn env_records_properties_in_store() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .env("SHIPYARD_SMOKE_MARKER", "present")
    .env("SHIPYARD_SMOKE_TOKEN", "hidden")
    .args(["--json", "env", "--build-name", "app", "--build-number", "3"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"captured\""));

  let stored = home.path().join("data/shipyard/builds/app/3.json");
  let content = std::fs::read_to_string(stored).unwrap();
  assert!(content.contains("buildInfo.env.SHIPYARD_SMOKE_MARKER"));
  assert!(!content.contains("SHIPYARD_SMOKE_TOKEN"));
}

#[test]
#[serial]
fn similar_build_names_are_stored_apart() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .args(["env", "--build-name", "team/demo", "--build-number", "1"])
    .assert()
    .success();
  assert!(home.path().join("data/shipyard/builds/team%2Fdemo/1.json").is_file());

  shipyard_cmd(&home)
    .env("SHIPYARD_URL", "http://127.0.0.1:9")
    .args(["publish", "--build-name", "team_demo", "--build-number", "1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no build-info recorded"));
}

#[test]
fn publish_without_recorded_build_fails() {
  let home = TempDir::new().unwrap();
  shipyard_cmd(&home)
    .env("SHIPYARD_URL", "http://127.0.0.1:9")
    .args(["publish", "--build-name", "app", "--build-number", "9"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no build-info recorded"));
}
