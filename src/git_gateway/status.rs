//! Working-tree state probes.

use anyhow::Result;

use super::exec::{run_git, run_git_stdout};
use super::GitGateway;

impl GitGateway {
    /// Any staged, modified or untracked paths.
    #[allow(dead_code)]
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let out = run_git_stdout(self.workdir(), &["status", "--porcelain"])?;
        Ok(!out.is_empty())
    }

    /// Staged changes only.
    #[allow(dead_code)]
    pub fn has_staged_changes(&self) -> Result<bool> {
        let output = run_git(self.workdir(), &["diff", "--cached", "--quiet"])?;
        Ok(!output.success())
    }

    /// Unstaged modifications to tracked files.
    #[allow(dead_code)]
    pub fn has_unstaged_changes(&self) -> Result<bool> {
        let output = run_git(self.workdir(), &["diff", "--quiet"])?;
        Ok(!output.success())
    }

    #[allow(dead_code)]
    pub fn has_untracked_files(&self) -> Result<bool> {
        let out = run_git_stdout(self.workdir(), &["ls-files", "--others", "--exclude-standard"])?;
        Ok(!out.is_empty())
    }

    /// Staged or modified tracked files. Untracked files are allowed: they
    /// survive checkouts and rebases untouched.
    pub fn has_staged_or_modified_changes(&self) -> Result<bool> {
        let out = run_git_stdout(self.workdir(), &["status", "--porcelain"])?;
        Ok(out.lines().any(|line| !line.starts_with("??")))
    }
}
