//! Shared helpers for integration tests driving the compiled binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::Result;

/// Path to the compiled `sta` binary.
pub fn sta_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sta"))
}

/// Initialize a git repository with one commit on `main` and run `sta init`.
pub fn init_test_repo(dir: &Path) -> Result<()> {
    git(dir, &["init", "--initial-branch=main"])?;
    git(dir, &["config", "user.name", "Test User"])?;
    git(dir, &["config", "user.email", "test@example.com"])?;
    // Editors must never block a test run
    git(dir, &["config", "core.editor", "true"])?;
    git(dir, &["config", "sequence.editor", "true"])?;

    fs::write(dir.join("README.md"), "# test repo\n")?;
    git(dir, &["add", "."])?;
    git(dir, &["commit", "-m", "initial commit"])?;

    let output = run_sta(dir, &["init", "--trunk", "main"])?;
    assert!(
        output.status.success(),
        "sta init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Run the binary with stdin closed (non-interactive).
pub fn run_sta(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(sta_binary())
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()?)
}

/// Run the binary and require success.
#[allow(dead_code)]
pub fn run_sta_ok(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = run_sta(dir, args)?;
    assert!(
        output.status.success(),
        "sta {:?} failed ({}): {}",
        args,
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

pub fn git(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git").args(args).current_dir(dir).output()?;
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(output)
}

#[allow(dead_code)]
pub fn git_stdout(dir: &Path, args: &[&str]) -> Result<String> {
    let output = git(dir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[allow(dead_code)]
pub fn current_branch(dir: &Path) -> Result<String> {
    git_stdout(dir, &["branch", "--show-current"])
}

#[allow(dead_code)]
pub fn rev_parse(dir: &Path, refspec: &str) -> Result<String> {
    git_stdout(dir, &["rev-parse", refspec])
}

/// True when `ancestor` is reachable from `descendant`.
#[allow(dead_code)]
pub fn is_ancestor(dir: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
    let status = Command::new("git")
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .current_dir(dir)
        .status()?;
    Ok(status.success())
}

/// Commit a file change on the current branch.
#[allow(dead_code)]
pub fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) -> Result<()> {
    fs::write(dir.join(file), contents)?;
    git(dir, &["add", file])?;
    git(dir, &["commit", "-m", message])?;
    Ok(())
}

/// Create and check out a branch at the current HEAD.
#[allow(dead_code)]
pub fn create_branch(dir: &Path, name: &str) -> Result<()> {
    git(dir, &["checkout", "-b", name])?;
    Ok(())
}

/// Track the current branch on `parent` via the binary.
#[allow(dead_code)]
pub fn track_current(dir: &Path, parent: &str) -> Result<()> {
    run_sta_ok(dir, &["track", "--parent", parent])?;
    Ok(())
}

/// The blob content of a metadata ref, if the ref exists.
#[allow(dead_code)]
pub fn metadata_blob(dir: &Path, branch: &str) -> Result<Option<String>> {
    let refname = format!("refs/strata/metadata/{}", branch);
    let probe = Command::new("git")
        .args(["rev-parse", "--verify", "--quiet", &refname])
        .current_dir(dir)
        .output()?;
    if !probe.status.success() {
        return Ok(None);
    }
    Ok(Some(git_stdout(dir, &["cat-file", "blob", &refname])?))
}
