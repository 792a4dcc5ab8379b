//! Shared test helpers for `llp-cli` integration tests.
//!
//! Every test gets its own git repo in a temp directory; nothing here
//! touches a real checkout.

use std::path::Path;
use std::process::{Command, Output};

use assert_cmd::cargo::CommandCargoExt;
use tempfile::TempDir;

/// A bare git repo with an initial commit on `main`, ready for `.issues/`,
/// `.loops/`, and `.llp.toml` fixtures to be dropped into it.
pub fn setup_test_repo() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");

    run_git(dir.path(), &["init", "-q"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["config", "user.name", "Test"]);
    std::fs::write(dir.path().join("README.md"), "# test repo\n").unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-q", "-m", "initial commit"]);
    run_git(dir.path(), &["branch", "-M", "main"]);

    dir
}

fn run_git(dir: &Path, args: &[&str]) -> Output {
    let out = Command::new("git").args(args).current_dir(dir).output().expect("failed to run git");
    assert!(out.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&out.stderr));
    out
}

/// Run the `llp` binary in `dir` and return its output (any exit code).
pub fn llp_in(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = std::process::Command::cargo_bin("llp").expect("llp binary not found");
    cmd.args(args).current_dir(dir).output().expect("failed to run llp")
}
