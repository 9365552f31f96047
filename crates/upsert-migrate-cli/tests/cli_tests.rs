//! CLI integration tests for upsert-migrate.
//!
//! These tests verify command-line argument parsing, help output, exit codes,
//! and end-to-end runs against JSON snapshot files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command for the upsert-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("upsert-migrate").unwrap()
}

const SOURCE_SNAPSHOT: &str = r#"{
  "tables": [
    {
      "info": {
        "table_name": "users",
        "columns": [
          { "name": "id", "data_type": "int", "is_nullable": false, "is_primary_key": true },
          { "name": "name", "data_type": "nvarchar(50)" }
        ]
      },
      "rows": [
        { "id": 1, "name": "Alice" },
        { "id": 2, "name": "Bob" }
      ]
    }
  ]
}"#;

const TARGET_SNAPSHOT: &str = r#"{
  "tables": [
    {
      "info": {
        "table_name": "users",
        "columns": [
          { "name": "id", "data_type": "integer", "is_nullable": false, "is_primary_key": true },
          { "name": "name", "data_type": "varchar(50)" }
        ]
      },
      "rows": [
        { "id": 1, "name": "Alicia" },
        { "id": 3, "name": "Mallory" }
      ]
    }
  ]
}"#;

/// A temp directory holding two snapshots and a config pointing at them.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(mode: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("source.json"), SOURCE_SNAPSHOT).unwrap();
        std::fs::write(dir.path().join("target.json"), TARGET_SNAPSHOT).unwrap();
        let config = format!(
            r#"source:
  engine: mssql
  file_path: {source}
target:
  engine: postgres
  file_path: {target}
migration:
  mode: {mode}
  retry_backoff_ms: 1
tables:
  - source_table: users
    target_table: users
    key_columns: [id]
"#,
            source = dir.path().join("source.json").display(),
            target = dir.path().join("target.json").display(),
            mode = mode,
        );
        std::fs::write(dir.path().join("config.yaml"), config).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.yaml")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut c = cmd();
        c.arg("--config").arg(self.config());
        c
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
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
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("dry-run"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("compare-schema"))
        .stdout(predicate::str::contains("compare-data"))
        .stdout(predicate::str::contains("map-type"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--migration-id"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("upsert-migrate"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--history-dir"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_unknown_subcommand_fails() {
    cmd().arg("resume").assert().failure();
}

// =============================================================================
// Type Mapping
// =============================================================================

#[test]
fn test_map_type_needs_no_config() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml"])
        .args(["map-type", "--from", "mssql", "--to", "postgres", "bit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BOOLEAN"))
        .stdout(predicate::str::contains("Lossiness"));
}

#[test]
fn test_map_type_json_output() {
    let output = cmd()
        .args([
            "--output-json",
            "map-type",
            "--from",
            "mysql",
            "--to",
            "mssql",
            "varchar(255)",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["target_type"], "NVARCHAR(255)");
    assert_eq!(value["lossiness"], "exact");
    assert_eq!(value["target_engine"], "mssql");
}

#[test]
fn test_map_type_unknown_engine() {
    cmd()
        .args(["map-type", "--from", "db2", "--to", "postgres", "int"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unknown database engine"));
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[test]
fn test_missing_config_file() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "validate"])
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_invalid_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "source: [not, a, connection").unwrap();
    cmd()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_validate_reports_config() {
    let ws = Workspace::new("upsert");
    ws.cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Mode: upsert"));
}

#[test]
fn test_health_check_missing_snapshot() {
    let ws = Workspace::new("upsert");
    std::fs::remove_file(ws.path("target.json")).unwrap();
    ws.cmd()
        .arg("health-check")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains("UNHEALTHY"));
}

// =============================================================================
// Compare and Migrate
// =============================================================================

#[test]
fn test_compare_data_counts() {
    let ws = Workspace::new("upsert");
    let output = ws
        .cmd()
        .args(["--output-json", "compare-data", "--table", "users"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["inserted_count"], 1);
    assert_eq!(value["updated_count"], 1);
    assert_eq!(value["deleted_count"], 1);
}

#[test]
fn test_compare_data_unknown_table() {
    let ws = Workspace::new("upsert");
    ws.cmd()
        .args(["compare-data", "--table", "orders"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("No table mapping"));
}

#[test]
fn test_compare_schema_runs() {
    let ws = Workspace::new("upsert");
    ws.cmd()
        .arg("compare-schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("unchanged"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let ws = Workspace::new("mirror");
    let before = std::fs::read_to_string(ws.path("target.json")).unwrap();
    let output = ws
        .cmd()
        .args(["--output-json", "dry-run"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let table = &value["tables"][0];
    assert_eq!(table["estimated_inserts"], 1);
    assert_eq!(table["estimated_updates"], 1);
    assert_eq!(table["estimated_deletes"], 1);
    assert_eq!(std::fs::read_to_string(ws.path("target.json")).unwrap(), before);
}

#[test]
fn test_run_mirror_then_compare_is_clean() {
    let ws = Workspace::new("mirror");
    ws.cmd()
        .args(["run", "--migration-id", "cli-mirror"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migration cli-mirror: completed"));

    let snapshot = read_json(&ws.path("target.json"));
    let rows = snapshot["tables"][0]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);

    let output = ws
        .cmd()
        .args(["--output-json", "compare-data", "--table", "users"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["inserted_count"], 0);
    assert_eq!(value["updated_count"], 0);
    assert_eq!(value["deleted_count"], 0);
}

#[test]
fn test_run_records_history() {
    let ws = Workspace::new("upsert");
    let history = ws.path("history");
    ws.cmd()
        .arg("--history-dir")
        .arg(&history)
        .args(["run", "--migration-id", "cli-history"])
        .assert()
        .success();

    ws.cmd()
        .arg("--history-dir")
        .arg(&history)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("cli-history"))
        .stdout(predicate::str::contains("completed"));
}

#[test]
fn test_history_requires_dir() {
    let ws = Workspace::new("upsert");
    ws.cmd()
        .env_remove("UPSERT_MIGRATE_HISTORY_DIR")
        .arg("history")
        .assert()
        .failure()
        .code(1);
}
