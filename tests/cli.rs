//! CLI subcommand smoke tests.

use assert_cmd::Command;

fn cmd(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("straylight").expect("binary");
    cmd.env("STRAYLIGHT_DATA_DIR", dir.path())
        .env("STRAYLIGHT_CONFIG_PATH", dir.path().join("straylight.toml"));
    cmd
}

#[test]
fn test_help_mentions_subcommands() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("serve"))
        .stdout(predicates::str::contains("explain"));
}

#[test]
fn test_explain_without_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(&dir)
        .arg("explain")
        .assert()
        .success()
        .stdout(predicates::str::contains("haven't acted yet"));
}

#[test]
fn test_budget_prints_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(&dir)
        .arg("budget")
        .assert()
        .success()
        .stdout(predicates::str::contains("schema_version"))
        .stdout(predicates::str::contains("budget"));
}

#[test]
fn test_invoke_rejects_empty_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(&dir).arg("invoke").write_stdin("").assert().failure();
}

#[test]
fn test_invoke_unregistered_tool_reports_tool_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(&dir)
        .arg("invoke")
        .write_stdin(r#"{"tool_name":"ghost","domain":"cognition","action":"say"}"#)
        .assert()
        .failure()
        .stdout(predicates::str::contains("tool_error"));
}
