#![allow(missing_docs)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use common::Fixture;
use serde_json::Value;

fn run(args: &[&str]) -> (bool, String, String) {
    let output = cargo_bin_cmd!("tessera")
        .env_remove("TESSERA_CONFIG")
        .args(args)
        .output()
        .expect("run tessera");
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

fn db(fixture: &Fixture) -> &str {
    fixture.path.to_str().expect("utf-8 path")
}

fn write_config(fixture: &Fixture, body: &str) -> PathBuf {
    let path = fixture.dir.path().join("tessera.toml");
    fs::write(&path, body).expect("write config");
    path
}

fn toml_path(path: &Path) -> String {
    format!("{:?}", path.display().to_string())
}

#[test]
fn inspect_lists_dialect_and_tables() {
    let fixture = Fixture::seeded();
    let (ok, stdout, stderr) = run(&["inspect", db(&fixture)]);
    assert!(ok, "stderr: {stderr}");
    assert!(stdout.contains("Repository: tessera"), "{stdout}");
    assert!(stdout.contains("Product: SQLite (dialect=sqlite"), "{stdout}");
    assert!(stdout.contains("savepoints=true"), "{stdout}");
    assert!(stdout.contains("  DEPARTMENT [TABLE]"), "{stdout}");
    assert!(stdout.contains("  EMPLOYEE [TABLE]"), "{stdout}");
}

#[test]
fn inspect_json_is_structured() {
    let fixture = Fixture::seeded();
    let (ok, stdout, stderr) = run(&["--format", "json", "inspect", db(&fixture)]);
    assert!(ok, "stderr: {stderr}");
    let report: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(report["dialect"], "sqlite");
    assert_eq!(report["slice_support"], "LimitAndOffset");
    assert_eq!(report["savepoints"], true);
    let tables: Vec<&str> = report["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(tables, vec!["DEPARTMENT", "EMPLOYEE"]);
}

#[test]
fn columns_describes_a_table() {
    let fixture = Fixture::seeded();
    let (ok, stdout, stderr) = run(&["columns", db(&fixture), "EMPLOYEE", "--format", "json"]);
    assert!(ok, "stderr: {stderr}");
    let columns: Value = serde_json::from_str(&stdout).expect("json output");
    let columns = columns.as_array().expect("array");
    let names: Vec<&str> = columns.iter().filter_map(|c| c["name"].as_str()).collect();
    assert_eq!(
        names,
        vec!["ID", "DEPT_ID", "NAME", "SALARY", "ACTIVE", "VERSION"]
    );
    assert_eq!(columns[0]["auto_increment"], true);
    assert_eq!(columns[3]["nullable"], false);

    let (ok, text, _) = run(&["columns", db(&fixture), "EMPLOYEE"]);
    assert!(ok);
    assert!(text.contains("  SALARY INTEGER not null"), "{text}");
}

#[test]
fn count_reports_rows() {
    let fixture = Fixture::seeded();
    let (ok, stdout, stderr) = run(&["count", db(&fixture), "EMPLOYEE"]);
    assert!(ok, "stderr: {stderr}");
    assert_eq!(stdout.trim(), "8 rows in EMPLOYEE");

    let (ok, stdout, _) = run(&["--format", "json", "count", db(&fixture), "DEPARTMENT"]);
    assert!(ok);
    let report: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(report["rows"], 3);
}

#[test]
fn unknown_table_fails() {
    let fixture = Fixture::seeded();
    let (ok, _, stderr) = run(&["count", db(&fixture), "PAYROLL"]);
    assert!(!ok);
    assert!(stderr.contains("no table named 'PAYROLL'"), "{stderr}");
}

#[test]
fn missing_database_fails_without_creating_it() {
    let fixture = Fixture::new();
    let missing = fixture.dir.path().join("missing.db");
    let (ok, _, stderr) = run(&["inspect", missing.to_str().expect("utf-8 path")]);
    assert!(!ok);
    assert!(stderr.contains("does not exist"), "{stderr}");
    assert!(!missing.exists());

    let (ok, _, stderr) = run(&["inspect"]);
    assert!(!ok);
    assert!(stderr.contains("no database given"), "{stderr}");
}

#[test]
fn configuration_file_supplies_defaults() {
    let fixture = Fixture::seeded();
    let config = write_config(
        &fixture,
        &format!(
            "name = \"hr\"\ndatabase = {}\nfetch_size = 50\n\n[entities.Employee]\nauto_versioning = true\n",
            toml_path(&fixture.path)
        ),
    );
    let config = config.to_str().expect("utf-8 path");

    let (ok, stdout, stderr) = run(&["--config", config, "inspect"]);
    assert!(ok, "stderr: {stderr}");
    assert!(stdout.contains("Repository: hr"), "{stdout}");

    let (ok, stdout, _) = run(&["--config", config, "--format", "json", "config"]);
    assert!(ok);
    let effective: Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(effective["fetch_size"], 50);
    assert_eq!(effective["entities"]["Employee"]["auto_versioning"], true);
    assert_eq!(effective["default_isolation"], "read_committed");

    let (ok, stdout, _) = run(&["--config", config, "config"]);
    assert!(ok);
    assert!(stdout.contains("name = \"hr\""), "{stdout}");
}

#[test]
fn malformed_configuration_is_reported() {
    let fixture = Fixture::seeded();
    let config = write_config(&fixture, "fetch_size = \"lots\"\nunknown_key = 1\n");
    let (ok, _, stderr) = run(&["--config", config.to_str().expect("utf-8 path"), "config"]);
    assert!(!ok);
    assert!(stderr.starts_with("error:"), "{stderr}");
}
