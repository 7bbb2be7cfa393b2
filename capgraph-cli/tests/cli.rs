use assert_cmd::Command;
use predicates::prelude::*;

fn cli(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("capgraph").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

#[test]
fn register_tool_then_suggest_finds_it() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .args(["register-tool", "--id", "fs:read", "--embedding", "[0.1,0.2,0.3,0.4]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registered tool fs:read"));

    let cap_id = uuid::Uuid::new_v4().to_string();
    cli(dir.path())
        .args([
            "register-capability",
            "--id",
            &cap_id,
            "--embedding",
            "[0.1,0.2,0.3,0.4]",
            "--members",
            r#"[{"Tool":"fs:read"}]"#,
            "--success-rate",
            "0.9",
        ])
        .assert()
        .success();

    cli(dir.path())
        .args(["--format", "json", "suggest", "--embedding", "[0.1,0.2,0.3,0.4]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ranked_count"));
}

#[test]
fn record_outcome_and_capture_event_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .args(["record-outcome", "--tool-id", "fs:write", "--success", "true"])
        .assert()
        .success();

    let workflow_id = uuid::Uuid::new_v4().to_string();
    cli(dir.path())
        .args([
            "capture-event",
            "--workflow-id",
            &workflow_id,
            "--event-type",
            "task-complete",
            "--data",
            r#"{"ok":true}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("captured event"));
}

#[test]
fn export_then_import_params_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let params_path = dir.path().join("params.json");

    cli(dir.path())
        .args(["export-params", "--out"])
        .arg(&params_path)
        .assert()
        .success();
    assert!(params_path.exists());

    cli(dir.path())
        .args(["import-params", "--file"])
        .arg(&params_path)
        .assert()
        .success();
}

#[test]
fn invalid_embedding_json_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .args(["register-tool", "--id", "fs:read", "--embedding", "not-json"])
        .assert()
        .failure();
}
