//! Worktree management and collision checks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::exec::{run_git_checked, run_git_stdout};
use super::GitGateway;

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Branch checked out in the worktree, `None` when detached or bare.
    pub branch: Option<String>,
}

impl GitGateway {
    #[allow(dead_code)]
    pub fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        run_git_checked(self.workdir(), &["worktree", "add", &path_str, branch])
            .with_context(|| format!("failed to add worktree at {:?}", path))?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        run_git_checked(self.workdir(), &["worktree", "remove", "--force", &path_str])
            .with_context(|| format!("failed to remove worktree at {:?}", path))?;
        Ok(())
    }

    pub fn worktree_list(&self) -> Result<Vec<WorktreeInfo>> {
        let out = run_git_stdout(self.workdir(), &["worktree", "list", "--porcelain"])?;
        let mut worktrees = Vec::new();
        let mut current: Option<WorktreeInfo> = None;

        for line in out.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(info) = current.take() {
                    worktrees.push(info);
                }
                current = Some(WorktreeInfo {
                    path: PathBuf::from(path),
                    branch: None,
                });
            } else if let Some(refname) = line.strip_prefix("branch ") {
                if let Some(info) = current.as_mut() {
                    info.branch = refname.strip_prefix("refs/heads/").map(str::to_string);
                }
            }
        }
        if let Some(info) = current {
            worktrees.push(info);
        }
        Ok(worktrees)
    }

    /// True when `branch` is checked out in a worktree other than this one.
    pub fn branch_busy_elsewhere(&self, branch: &str) -> Result<bool> {
        for info in self.worktree_list()? {
            if info.branch.as_deref() == Some(branch) && info.path != self.workdir() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{branch_at_head, init_fixture_repo, FixtureContext};
    use tempfile::tempdir;

    #[test]
    fn worktree_add_list_remove() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        branch_at_head(&repo, "side")?;
        let _ctx = FixtureContext::new(dir.path());
        let gateway = GitGateway::open()?;

        let wt_dir = tempdir()?;
        let wt_path = wt_dir.path().join("side-wt");
        gateway.worktree_add(&wt_path, "side")?;

        assert!(gateway.branch_busy_elsewhere("side")?);
        assert!(!gateway.branch_busy_elsewhere("main")?);

        let listed = gateway.worktree_list()?;
        assert!(listed.iter().any(|w| w.branch.as_deref() == Some("side")));

        gateway.worktree_remove(&wt_path)?;
        assert!(!gateway.branch_busy_elsewhere("side")?);
        Ok(())
    }
}
