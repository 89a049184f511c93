//! Branch and checkout operations.

use anyhow::{Context, Result};

use crate::errors::StackError;
use crate::git_backend::Oid;

use super::exec::{run_git, run_git_checked, run_git_stdout};
use super::GitGateway;

impl GitGateway {
    /// Name of the current branch.
    ///
    /// Detached HEAD is a `Precondition` error; operations that can work
    /// detached use `current_branch()` instead.
    pub fn require_current_branch(&self) -> Result<String> {
        self.backend()
            .current_branch()?
            .ok_or_else(|| StackError::Precondition("not on a branch (detached HEAD)".to_string()).into())
    }

    pub fn current_branch(&self) -> Result<Option<String>> {
        self.backend().current_branch()
    }

    pub fn create_branch_at(&self, name: &str, at: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["branch", name, at])
            .with_context(|| format!("failed to create branch '{}'", name))?;
        Ok(())
    }

    pub fn delete_branch(&self, name: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["branch", "-D", name])
            .with_context(|| format!("failed to delete branch '{}'", name))?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["branch", "-m", old, new])
            .with_context(|| format!("failed to rename branch '{}' to '{}'", old, new))?;
        Ok(())
    }

    /// Checkout a branch. If the branch is checked out in another worktree,
    /// fall back to a detached checkout of its tip so the operation can still
    /// proceed.
    pub fn checkout(&self, branch: &str) -> Result<()> {
        let args = ["checkout", branch];
        let output = run_git(self.workdir(), &args)?;
        if output.success() {
            return Ok(());
        }
        if output.stderr.contains("already used by worktree") || output.stderr.contains("is already checked out") {
            return self.checkout_detached(branch);
        }
        Err(super::exec::exit_error(&args, &output)).with_context(|| format!("failed to checkout '{}'", branch))
    }

    /// Checkout a revision without moving any branch ref.
    pub fn checkout_detached(&self, refspec: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["checkout", "--detach", refspec])
            .with_context(|| format!("failed to checkout '{}' (detached)", refspec))?;
        Ok(())
    }

    /// Tip of HEAD, whether attached or detached.
    pub fn head_revision(&self) -> Result<Oid> {
        let sha = run_git_stdout(self.workdir(), &["rev-parse", "HEAD"])?;
        Ok(Oid::from_trusted(&sha))
    }
}
