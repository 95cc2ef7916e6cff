//! CLI integration smoke tests for the `rdl` binary.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

const EDITS: &str =
    "###EDIT app.py\nBump the constant.\n\n#### Replace `    x = 1`\n```python\n    x = 2\n```\n";

fn rdl() -> Command {
    Command::cargo_bin("rdl").unwrap()
}

fn sandbox() -> assert_fs::TempDir {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("app.py")
        .write_str("def f():\n    x = 1\n    return x\n")
        .unwrap();
    temp.child("edits.md").write_str(EDITS).unwrap();
    temp
}

#[test]
fn apply_defaults_to_safety_preview() {
    let temp = sandbox();
    rdl()
        .args(["apply", "--no-color", "--root"])
        .arg(temp.path())
        .arg(temp.child("edits.md").path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Safety mode"))
        .stdout(predicate::str::contains("+    x = 2"));

    temp.child("app.py")
        .assert("def f():\n    x = 1\n    return x\n");
}

#[test]
fn apply_writes_journals_and_rolls_back() {
    let temp = sandbox();

    rdl()
        .args(["apply", "--apply", "--no-color", "--root"])
        .arg(temp.path())
        .arg(temp.child("edits.md").path())
        .assert()
        .success()
        .stdout(predicate::str::contains("applied 1 edit(s)"));
    temp.child("app.py")
        .assert("def f():\n    x = 2\n    return x\n");

    rdl()
        .args(["status", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("app.py"));

    rdl()
        .args(["rollback", "--file", "app.py", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored app.py"));
    temp.child("app.py")
        .assert("def f():\n    x = 1\n    return x\n");

    rdl()
        .args(["status", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending edits"));
}

#[test]
fn rollback_by_turn_via_journal() {
    let temp = sandbox();

    rdl()
        .args(["apply", "--apply", "--turn", "4", "--no-color", "--root"])
        .arg(temp.path())
        .arg(temp.child("edits.md").path())
        .assert()
        .success();

    rdl()
        .args(["rollback", "--turn", "4", "--no-color", "--root"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored 1 file(s)"));
    temp.child("app.py")
        .assert("def f():\n    x = 1\n    return x\n");
}

#[test]
fn failed_directive_exits_nonzero() {
    let temp = sandbox();
    temp.child("bad.md")
        .write_str("###EDIT ghost.py\n#### Replace `x`\n```python\ny\n```\n")
        .unwrap();

    rdl()
        .args(["apply", "--apply", "--no-color", "--root"])
        .arg(temp.path())
        .arg(temp.child("bad.md").path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Invalid path"));
}

#[test]
fn parse_reads_stdin_and_emits_json() {
    let temp = sandbox();
    rdl()
        .current_dir(temp.path())
        .args(["parse", "--json"])
        .write_stdin(EDITS)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"filename\": \"app.py\""));
}

#[test]
fn preview_expands_headers_without_writing() {
    let temp = sandbox();
    rdl()
        .args(["preview", "--root"])
        .arg(temp.path())
        .arg(temp.child("edits.md").path())
        .assert()
        .success()
        .stdout(predicate::str::contains("#### Replace 2-2"))
        .stdout(predicate::str::contains("#### WITH"));

    temp.child("app.py")
        .assert("def f():\n    x = 1\n    return x\n");
}

#[test]
fn init_writes_config_once() {
    let temp = assert_fs::TempDir::new().unwrap();
    rdl().arg("init").arg(temp.path()).assert().success();
    temp.child("redline.toml")
        .assert(predicate::str::contains("[journal]"));

    rdl()
        .arg("init")
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}
