//! CLI subprocess integration tests.
//!
//! These tests invoke the `gantry` binary against the mock engine and local
//! sources, and verify exit codes, stdout content and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn gantry_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gantry"));
    cmd.env("GANTRY_SKIP_PREREQS", "1")
        .env("HOME", home)
        .env_remove("GANTRY_LOG");
    cmd
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("README.md"), "Hello").unwrap();
        std::fs::write(src.join("Dockerfile"), "FROM busybox\n").unwrap();
        std::fs::write(
            dir.path().join("gantry.toml"),
            format!(
                "engine = \"mock\"\nworkspace = \"{}\"\n",
                dir.path().join("ws").display()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> PathBuf {
        self.path().join("gantry.toml")
    }

    fn write_pipeline(&self, stages: &str) -> PathBuf {
        let path = self.path().join("pipeline.toml");
        std::fs::write(
            &path,
            format!(
                "pipeline_version = 1\nname = \"demo\"\n\n[checkout.main]\nkind = \"local\"\nurl = \"{}\"\n{stages}",
                self.path().join("src").display()
            ),
        )
        .unwrap();
        path
    }

    fn gantry(&self, args: &[&str]) -> Output {
        let config = self.config();
        let mut cmd = gantry_bin(self.path());
        cmd.arg("--config").arg(&config).args(args);
        cmd.output().unwrap()
    }
}

const BUILD_AND_RELEASE: &str = r#"
[[image_build.builds]]
image_name = "demo:v1"

[integration_test.config]
image = "demo:v1"
commands = ["ls"]

[[integration_test.services]]
name = "db"
image = "mongo:3.0.5"

[[image_release.policies]]
image = "demo:v1"
"#;

#[test]
fn cli_version_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    let output = gantry_bin(home.path()).arg("--version").output().unwrap();
    assert!(output.status.success(), "gantry --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("gantry"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = gantry_bin(home.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "validate", "doctor", "completions"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_validate_lists_stages_in_order() {
    let project = Project::new();
    let pipeline = project.write_pipeline(BUILD_AND_RELEASE);
    let output = project.gantry(&["--json", "validate", &pipeline.to_string_lossy()]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["name"], "demo");
    assert_eq!(
        json["stages"],
        serde_json::json!(["checkout", "image_build", "integration_test", "image_release"])
    );
}

#[test]
fn cli_validate_rejects_bad_pipeline_with_exit_2() {
    let project = Project::new();
    let path = project.path().join("bad.toml");
    std::fs::write(&path, "pipeline_version = 9\n[checkout.main]\nkind = \"local\"\nurl = \"/x\"\n")
        .unwrap();
    let output = project.gantry(&["validate", &path.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pipeline error"), "stderr: {stderr}");
}

#[test]
fn cli_run_full_pipeline_with_mock_engine() {
    let project = Project::new();
    let pipeline = project.write_pipeline(BUILD_AND_RELEASE);
    let output = project.gantry(&[
        "--json",
        "run",
        &pipeline.to_string_lossy(),
        "--event-id",
        "evt-1",
        "--ref",
        "refs/heads/master",
    ]);
    assert!(
        output.status.success(),
        "run must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["event_id"], "evt-1");
    assert_eq!(json["success"], true);
    let stages = json["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 4);
    assert!(stages.iter().all(|s| s["status"] == "succeeded"));
    assert_eq!(stages[3]["artifacts"]["images"], serde_json::json!(["demo:v1"]));
    assert!(project.path().join("ws/README.md").exists());
}

#[test]
fn cli_run_stage_failure_exits_3_and_skips_the_rest() {
    let project = Project::new();
    let pipeline = project.write_pipeline(
        r#"
[[image_build.builds]]
image_name = "demo:v1"
dockerfile_path = "Dockerfile-abc"

[[image_release.policies]]
image = "demo:v1"
"#,
    );
    let output = project.gantry(&[
        "--json",
        "run",
        &pipeline.to_string_lossy(),
        "--event-id",
        "evt-2",
    ]);
    assert_eq!(output.status.code(), Some(3));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["stages"][1]["status"], "failed");
    assert!(json["stages"][1]["error"]
        .as_str()
        .unwrap()
        .contains("Dockerfile-abc"));
    assert_eq!(json["stages"][2]["status"], "skipped");
}

#[test]
fn cli_run_with_unknown_engine_is_a_config_error() {
    let project = Project::new();
    let pipeline = project.write_pipeline("");
    let output = project.gantry(&[
        "run",
        &pipeline.to_string_lossy(),
        "--event-id",
        "evt-3",
        "--engine",
        "containerd",
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_missing_config_file_is_a_config_error() {
    let project = Project::new();
    let pipeline = project.write_pipeline("");
    let output = gantry_bin(project.path())
        .args(["--config", "/nonexistent/gantry.toml", "run"])
        .arg(&pipeline)
        .args(["--event-id", "evt-4"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("config error"));
}

#[test]
fn cli_doctor_json_reports_checks() {
    let project = Project::new();
    let output = project.gantry(&["--json", "doctor"]);
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let checks = json["checks"].as_array().unwrap();
    let names: Vec<&str> = checks.iter().filter_map(|c| c["name"].as_str()).collect();
    assert!(names.contains(&"engine"));
    assert!(names.contains(&"workspace"));
    let engine = checks.iter().find(|c| c["name"] == "engine").unwrap();
    assert_eq!(engine["status"], "pass");
}

#[test]
fn cli_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    let output = gantry_bin(home.path())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("gantry"));
}
