//! Smoke tests for the gridrun binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &std::path::Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("gridrun.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("gridrun")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn validate_accepts_a_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
        [build]
        concurrency = 2
        max_retries = 1

        [discovery]
        ids = ["t1", "t2"]
        "#,
    );

    Command::cargo_bin("gridrun")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration OK"));
}

#[test]
fn validate_rejects_zero_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
        [build]
        concurrency = 0
        "#,
    );

    Command::cargo_bin("gridrun")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid concurrency"));
}

#[test]
fn plan_prints_the_shard_layout() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
            [build]
            concurrency = 2
            autosplit = false
            matrix_dims = [["chrome", "firefox"]]

            [discovery]
            ids = ["t1", "t2"]

            [history]
            path = "{}/history.json"
            "#,
            dir.path().display()
        ),
    );

    Command::cargo_bin("gridrun")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 test units -> 4 shards"))
        .stdout(predicate::str::contains("t1[chrome]"))
        .stdout(predicate::str::contains("t2[firefox]"));
}

#[test]
fn run_reports_a_passing_build() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
            [build]
            concurrency = 2
            max_retries = 0
            smart_ordering = false

            [runner]
            command = "echo {{id}}"

            [discovery]
            ids = ["t1", "t2", "t3"]

            [history]
            path = "{}/history.json"
            "#,
            dir.path().display()
        ),
    );

    Command::cargo_bin("gridrun")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "run", "--json"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"final_passed\""));

    // The build persisted ordering history.
    let history = std::fs::read_to_string(dir.path().join("history.json")).unwrap();
    assert!(history.contains("t1"));
}

#[test]
fn run_exits_nonzero_when_tests_fail() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
            [build]
            concurrency = 1
            max_retries = 0

            [runner]
            command = "false"

            [discovery]
            ids = ["t1"]

            [history]
            path = "{}/history.json"
            "#,
            dir.path().display()
        ),
    );

    Command::cargo_bin("gridrun")
        .unwrap()
        .args(["--config", config.to_str().unwrap(), "run"])
        .current_dir(dir.path())
        .assert()
        .code(1);
}
