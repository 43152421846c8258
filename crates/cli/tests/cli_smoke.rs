//! CLI smoke tests for quill.
//!
//! These tests verify that the CLI commands run without panicking and
//! return appropriate exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the quill binary.
fn quill_cmd() -> Command {
  cargo_bin_cmd!("quill")
}

/// Create a temp directory holding a minimal package.
fn temp_package() -> TempDir {
  let temp = TempDir::new().unwrap();
  let dir = temp.path().join("demo");
  std::fs::create_dir_all(dir.join("src")).unwrap();
  std::fs::write(dir.join("quill.toml"), "name = \"demo\"\nsrc_dir = \"src\"\n").unwrap();
  std::fs::write(dir.join("src/Main.qu"), "def main := ()\n").unwrap();
  temp
}

#[test]
fn help_flag_works() {
  quill_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  quill_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("quill"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "paths"] {
    quill_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

#[test]
fn build_without_manifest_fails() {
  let temp = TempDir::new().unwrap();

  quill_cmd()
    .arg("build")
    .arg("--dir")
    .arg(temp.path())
    .assert()
    .failure();
}

#[test]
fn build_unknown_module_fails() {
  let temp = temp_package();

  quill_cmd()
    .arg("build")
    .arg("--dir")
    .arg(temp.path().join("demo"))
    .arg("Ghost")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown module"));
}

#[test]
fn paths_no_build_prints_artifact_locations() {
  let temp = temp_package();

  quill_cmd()
    .arg("paths")
    .arg("--dir")
    .arg(temp.path().join("demo"))
    .arg("--no-build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Main"))
    .stdout(predicate::str::contains("Main.qo"));
}
