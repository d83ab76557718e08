//! The `vista-graph` binary end to end

use std::process::{Command, Output};

use crate::common::*;

fn run_cli(fixture: &VistaFixture, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vista-graph"))
        .current_dir(fixture.path())
        .env("RUST_LOG", "off")
        .args(args)
        .output()
        .expect("Failed to run CLI")
}

fn run_cli_success(fixture: &VistaFixture, args: &[&str]) -> String {
    let output = run_cli(fixture, args);
    assert!(
        output.status.success(),
        "CLI command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn build_args<'a>(extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![
        "build",
        "--dump",
        "dumps",
        "--routines",
        "routines",
        "--registry",
        "packages.toml",
        "--store",
        "graph.db",
    ];
    args.extend_from_slice(extra);
    args
}

#[test]
fn test_build_dry_run_reports_without_store() {
    let fixture = VistaFixture::standard();
    let stdout = run_cli_success(&fixture, &build_args(&["--dry-run"]));
    let report = assert_valid_json(&stdout, "build --dry-run");
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["entities"]["File"], 4);
    assert_eq!(report["entities"]["Routine"], 3);
    assert_eq!(report["unresolved"]["total"], 2);
    assert!(report["validation"].is_null());
    assert!(!fixture.path().join("graph.db").exists());
}

#[test]
fn test_build_then_validate() {
    let fixture = VistaFixture::standard();
    let stdout = run_cli_success(&fixture, &build_args(&["--report", "out/report.json"]));
    let report = assert_valid_json(&stdout, "build");
    assert_eq!(report["validation"]["passed"], true);
    assert!(fixture.path().join("out/report.json").exists());

    let stdout = run_cli_success(&fixture, &["validate", "--store", "graph.db"]);
    let summary = assert_valid_json(&stdout, "validate");
    assert_eq!(summary["nodes"]["File"], 4);
    assert_eq!(summary["nodes"]["Field"], 7);
    assert_eq!(summary["files_without_fields"][0], "44");
}

#[test]
fn test_reset_edges_clears_append_kind() {
    let fixture = VistaFixture::standard();
    run_cli_success(&fixture, &build_args(&[]));
    let stdout = run_cli_success(
        &fixture,
        &["reset-edges", "--store", "graph.db", "--kind", "ACCESSES"],
    );
    let result = assert_valid_json(&stdout, "reset-edges");
    assert_eq!(result["kind"], "ACCESSES");
    assert_eq!(result["removed"], 4);
}

#[test]
fn test_decode_prints_entries_and_summary() {
    let fixture = VistaFixture::standard();
    let stdout = run_cli_success(&fixture, &["decode", "dumps/DD.zwr"]);
    let lines: Vec<&str> = stdout.lines().collect();
    let first = assert_valid_json(lines[0], "first entry");
    assert_eq!(first["store"], "DD");
    let summary = assert_valid_json(lines[lines.len() - 1], "summary");
    assert_eq!(summary["summary"]["files"], 4);
    assert_eq!(summary["summary"]["decode"]["malformed"], 0);
}

#[test]
fn test_missing_dump_exit_code() {
    let fixture = VistaFixture::new();
    let output = run_cli(&fixture, &["decode", "absent.zwr"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.zwr"));
}
