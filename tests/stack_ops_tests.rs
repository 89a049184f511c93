//! End-to-end stack manipulation through the compiled binary.

mod common;

use anyhow::Result;
use common::*;
use tempfile::TempDir;

#[test]
fn create_tracks_and_checks_out_the_new_branch() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;

    run_sta_ok(dir.path(), &["create", "feature-1"])?;

    assert_eq!(current_branch(dir.path())?, "feature-1");
    let blob = metadata_blob(dir.path(), "feature-1")?.expect("metadata written");
    assert!(blob.contains("\"parentBranchName\": \"main\""), "blob: {}", blob);
    Ok(())
}

#[test]
fn create_with_message_commits_staged_changes() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    std::fs::write(dir.path().join("work.txt"), "work")?;

    run_sta_ok(dir.path(), &["create", "feature-1", "-a", "-m", "add work"])?;

    assert_eq!(current_branch(dir.path())?, "feature-1");
    assert_eq!(git_stdout(dir.path(), &["log", "-1", "--format=%s"])?, "add work");
    Ok(())
}

#[test]
fn track_and_untrack_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    create_branch(dir.path(), "feature-1")?;
    commit_file(dir.path(), "f1.txt", "one", "f1")?;

    track_current(dir.path(), "main")?;
    assert!(metadata_blob(dir.path(), "feature-1")?.is_some());

    run_sta_ok(dir.path(), &["untrack", "feature-1"])?;
    assert!(metadata_blob(dir.path(), "feature-1")?.is_none());
    // The git branch survives untracking
    assert_eq!(current_branch(dir.path())?, "feature-1");
    Ok(())
}

#[test]
fn move_onto_descendant_exits_with_user_error() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    create_branch(dir.path(), "a")?;
    commit_file(dir.path(), "a.txt", "a", "a1")?;
    track_current(dir.path(), "main")?;
    create_branch(dir.path(), "b")?;
    commit_file(dir.path(), "b.txt", "b", "b1")?;
    track_current(dir.path(), "a")?;

    let before = metadata_blob(dir.path(), "a")?;
    let output = run_sta(dir.path(), &["move", "--source", "a", "--onto", "b"])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("descendant"), "stderr: {}", stderr);
    // Nothing changed
    assert_eq!(metadata_blob(dir.path(), "a")?, before);
    Ok(())
}

#[test]
fn move_rewrites_parent_and_rebases() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    create_branch(dir.path(), "a")?;
    commit_file(dir.path(), "a.txt", "a", "a1")?;
    track_current(dir.path(), "main")?;
    git(dir.path(), &["checkout", "main"])?;
    create_branch(dir.path(), "b")?;
    commit_file(dir.path(), "b.txt", "b", "b1")?;
    track_current(dir.path(), "main")?;

    run_sta_ok(dir.path(), &["move", "--source", "b", "--onto", "a"])?;

    let blob = metadata_blob(dir.path(), "b")?.expect("metadata");
    assert!(blob.contains("\"parentBranchName\": \"a\""), "blob: {}", blob);
    assert!(is_ancestor(dir.path(), "a", "b")?);
    Ok(())
}

#[test]
fn reorder_via_file_swaps_the_chain() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    create_branch(dir.path(), "a")?;
    commit_file(dir.path(), "a.txt", "a", "a1")?;
    track_current(dir.path(), "main")?;
    create_branch(dir.path(), "b")?;
    commit_file(dir.path(), "b.txt", "b", "b1")?;
    track_current(dir.path(), "a")?;

    let order = dir.path().join("order.txt");
    std::fs::write(&order, "b\na\n")?;
    run_sta_ok(dir.path(), &["reorder", "--file", order.to_str().unwrap()])?;

    let a_blob = metadata_blob(dir.path(), "a")?.unwrap();
    let b_blob = metadata_blob(dir.path(), "b")?.unwrap();
    assert!(b_blob.contains("\"parentBranchName\": \"main\""), "b: {}", b_blob);
    assert!(a_blob.contains("\"parentBranchName\": \"b\""), "a: {}", a_blob);
    assert!(is_ancestor(dir.path(), "b", "a")?);
    Ok(())
}

#[test]
fn reorder_dropping_a_branch_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;
    create_branch(dir.path(), "a")?;
    commit_file(dir.path(), "a.txt", "a", "a1")?;
    track_current(dir.path(), "main")?;
    create_branch(dir.path(), "b")?;
    commit_file(dir.path(), "b.txt", "b", "b1")?;
    track_current(dir.path(), "a")?;

    let order = dir.path().join("order.txt");
    std::fs::write(&order, "b\n")?;
    let output = run_sta(dir.path(), &["reorder", "--file", order.to_str().unwrap()])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("untrack"), "stderr: {}", stderr);
    Ok(())
}

#[test]
fn trunk_command_reports_the_configured_trunk() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;

    let output = run_sta_ok(dir.path(), &["trunk"])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("main"), "stdout: {}", stdout);
    Ok(())
}

#[test]
fn unknown_branch_arguments_exit_one() -> Result<()> {
    let dir = TempDir::new()?;
    init_test_repo(dir.path())?;

    let output = run_sta(dir.path(), &["untrack", "ghost"])?;
    assert_eq!(output.status.code(), Some(1));
    Ok(())
}
