//! E2E tests for the local journal commands: init, add, list, validate,
//! repair.
//!
//! Each test runs the `chronicle` binary as a subprocess against an isolated
//! temp directory passed with `--dir`.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

fn chronicle(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("chronicle"));
    cmd.arg("--dir").arg(dir);
    cmd.env("CHRONICLE_LOG", "error");
    cmd.env_remove("CHRONICLE_FORMAT");
    cmd.env_remove("CHRONICLE_DIR");
    cmd
}

fn init(dir: &Path) {
    chronicle(dir).arg("init").assert().success();
}

fn add(dir: &Path, args: &[&str]) -> String {
    let output = chronicle(dir)
        .arg("add")
        .args(args)
        .arg("--json")
        .output()
        .expect("add should not crash");
    assert!(
        output.status.success(),
        "add failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).expect("add --json is JSON");
    json["id"].as_str().expect("id field").to_string()
}

fn list_json(dir: &Path, extra: &[&str]) -> Vec<Value> {
    let output = chronicle(dir)
        .arg("list")
        .args(extra)
        .arg("--json")
        .output()
        .expect("list should not crash");
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("list --json is JSON");
    json.as_array().expect("array").clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn init_creates_log_and_config() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = tmp.path().join("journal");
    chronicle(&dir)
        .args(["init", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created_log\": true"));

    assert!(dir.join("chronicle.log").is_file());
    assert!(dir.join("config.toml").is_file());

    chronicle(&dir)
        .args(["init", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created_log\": false"));
}

#[test]
fn commands_require_init() {
    let tmp = TempDir::new().expect("tempdir");
    chronicle(tmp.path())
        .args(["add", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1001"))
        .stderr(predicate::str::contains("chronicle init"));
}

#[test]
fn add_then_list_round_trips_metadata() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());

    let first = add(tmp.path(), &["Morning", "pages"]);
    let second = add(
        tmp.path(),
        &[
            "-t",
            "decision",
            "--tag",
            "work,planning",
            "--person",
            "Alice",
            "--review",
            "2026-12-01",
            "--ref",
            &first,
            "Chose plan B",
        ],
    );

    let entries = list_json(tmp.path(), &[]);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], first.as_str());
    assert_eq!(entries[0]["type"], "entry");
    assert_eq!(entries[0]["body"][0], "Morning pages");

    let decision = &entries[1];
    assert_eq!(decision["id"], second.as_str());
    assert_eq!(decision["type"], "decision");
    assert_eq!(decision["tags"], serde_json::json!(["planning", "work"]));
    assert_eq!(decision["people"], serde_json::json!(["Alice"]));
    assert_eq!(decision["review_date"], "2026-12-01");
    assert_eq!(decision["ref"], first.as_str());

    let log = std::fs::read_to_string(tmp.path().join("chronicle.log")).expect("read log");
    assert!(log.contains(&format!("@entry {second} ")));
    assert!(log.contains("[planning,work] [people:Alice] [review:2026-12-01]"));
}

#[test]
fn add_reads_body_from_stdin() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());

    chronicle(tmp.path())
        .arg("add")
        .write_stdin("\n\nfirst line\n\n  indented\n\n")
        .assert()
        .success();

    let entries = list_json(tmp.path(), &[]);
    assert_eq!(
        entries[0]["body"],
        serde_json::json!(["first line", "", "  indented"])
    );
}

#[test]
fn add_rejects_marker_lines() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());

    chronicle(tmp.path())
        .arg("add")
        .write_stdin("fine\n@end\nmore\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));
    assert!(list_json(tmp.path(), &[]).is_empty());
}

#[test]
fn list_filters_and_limits() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());
    add(tmp.path(), &["-t", "win", "one"]);
    add(tmp.path(), &["two"]);
    add(tmp.path(), &["-t", "win", "three"]);

    let wins = list_json(tmp.path(), &["-t", "win"]);
    assert_eq!(wins.len(), 2);

    let last = list_json(tmp.path(), &["-n", "1"]);
    assert_eq!(last.len(), 1);
    assert_eq!(last[0]["body"][0], "three");
}

#[test]
fn validate_reports_every_problem_and_fails() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());
    std::fs::write(
        tmp.path().join("chronicle.log"),
        "@entry 20260101-1200-aaaa 2026-01-01T12:00:00Z entry\nok\n@end\n\
         stray text\n\
         @end\n",
    )
    .expect("write log");

    let output = chronicle(tmp.path())
        .args(["validate", "--json"])
        .output()
        .expect("validate runs");
    assert!(!output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(json["ok"], false);
    assert_eq!(json["entries"], 1);
    let lines: Vec<u64> = json["findings"]
        .as_array()
        .expect("findings")
        .iter()
        .map(|f| f["line"].as_u64().expect("line"))
        .collect();
    assert_eq!(lines, vec![4, 5]);
    assert!(String::from_utf8_lossy(&output.stderr).contains("E2001"));
}

#[test]
fn validate_passes_on_clean_log() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());
    add(tmp.path(), &["hello"]);
    chronicle(tmp.path())
        .args(["validate", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entries=1 findings=0"));
}

#[test]
fn repair_quarantines_torn_append() {
    let tmp = TempDir::new().expect("tempdir");
    init(tmp.path());
    let kept = add(tmp.path(), &["survives"]);

    let log = tmp.path().join("chronicle.log");
    let mut text = std::fs::read_to_string(&log).expect("read");
    text.push_str("\n@entry 20260101-1200-dead 2026-01-01T12:00:00Z entry\nhalf wri");
    std::fs::write(&log, text).expect("write torn");

    chronicle(tmp.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2001"));

    chronicle(tmp.path())
        .args(["repair", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("repaired=true records=1"));

    let entries = list_json(tmp.path(), &[]);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], kept.as_str());

    let corrupt =
        std::fs::read_to_string(tmp.path().join("chronicle.log.corrupt")).expect("corrupt");
    assert!(corrupt.contains("half wri"));

    chronicle(tmp.path())
        .args(["repair", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("repaired=false"));
}
