//! Commit creation, staging, reset and cherry-pick.

use anyhow::{Context, Result};

use crate::git_backend::Oid;

use super::exec::{run_git, run_git_checked, run_git_stdout};
use super::GitGateway;

/// How to record staged changes.
#[derive(Debug, Clone)]
pub enum CommitMode {
    /// New commit with the given message.
    New { message: String },
    /// Amend HEAD, keeping its message.
    AmendNoEdit,
    /// Amend HEAD with a new message.
    Amend { message: String },
}

impl GitGateway {
    pub fn commit(&self, mode: &CommitMode) -> Result<()> {
        let args: Vec<&str> = match mode {
            CommitMode::New { message } => vec!["commit", "-m", message],
            CommitMode::AmendNoEdit => vec!["commit", "--amend", "--no-edit"],
            CommitMode::Amend { message } => vec!["commit", "--amend", "-m", message],
        };
        run_git_checked(self.workdir(), &args).context("commit failed")?;
        Ok(())
    }

    /// Stage everything, including untracked files.
    pub fn stage_all(&self) -> Result<()> {
        run_git_checked(self.workdir(), &["add", "-A"]).context("failed to stage changes")?;
        Ok(())
    }

    /// Stage updates to already-tracked files only.
    pub fn stage_tracked(&self) -> Result<()> {
        run_git_checked(self.workdir(), &["add", "-u"]).context("failed to stage tracked changes")?;
        Ok(())
    }

    pub fn reset_hard(&self, target: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["reset", "--hard", target])
            .with_context(|| format!("failed to hard-reset to {}", target))?;
        Ok(())
    }

    #[allow(dead_code)] // part of the reset surface alongside reset_hard
    pub fn reset_soft(&self, target: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["reset", "--soft", target])
            .with_context(|| format!("failed to soft-reset to {}", target))?;
        Ok(())
    }

    /// Cherry-pick a single commit onto a detached base revision, returning
    /// the new commit id. HEAD is left detached at the result; the caller
    /// decides which ref (if any) to move.
    #[allow(dead_code)] // used by future history-editing commands
    pub fn cherry_pick_onto(&self, commit: &Oid, onto: &Oid) -> Result<Oid> {
        self.checkout_detached(onto.as_str())?;
        run_git_checked(self.workdir(), &["cherry-pick", commit.as_str()])
            .with_context(|| format!("cherry-pick of {} failed", commit.short()))?;
        self.head_revision()
    }

    /// `git cherry`-style test: are all of the branch's owned commits (those
    /// since `since`) already present upstream? Lines starting with `-` are
    /// present; `+` marks a commit the upstream does not have.
    pub fn all_commits_upstream(&self, upstream: &str, branch: &str, since: Option<&str>) -> Result<bool> {
        let mut args = vec!["cherry", upstream, branch];
        if let Some(since) = since {
            args.push(since);
        }
        let output = run_git(self.workdir(), &args)?;
        if !output.success() {
            // Unknown revisions - treat as not merged rather than failing sync
            return Ok(false);
        }
        let has_owned = output.stdout.lines().any(|l| !l.trim().is_empty());
        let any_missing = output.stdout.lines().any(|l| l.starts_with('+'));
        Ok(has_owned && !any_missing)
    }

    /// Create a commit carrying `tree_source`'s tree with a single parent.
    /// This is how a whole range collapses into one commit: for a branch
    /// based on `parent`, the result's diff against `parent` equals the
    /// branch's cumulative diff.
    pub fn commit_tree_of(&self, tree_source: &str, parent: &str, message: &str) -> Result<Oid> {
        let tree_spec = format!("{}^{{tree}}", tree_source);
        let sha = run_git_stdout(
            self.workdir(),
            &["commit-tree", &tree_spec, "-p", parent, "-m", message],
        )?;
        Ok(Oid::from_trusted(&sha))
    }

    /// Unified diff between two revisions.
    #[allow(dead_code)]
    pub fn diff_raw(&self, base: &str, head: &str) -> Result<String> {
        Ok(run_git_stdout(self.workdir(), &["diff", base, head])?)
    }

    /// Diffstat between two revisions.
    #[allow(dead_code)]
    pub fn diff_stat(&self, base: &str, head: &str) -> Result<String> {
        Ok(run_git_stdout(self.workdir(), &["diff", "--stat", base, head])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{branch_at_head, checkout, commit_file, init_fixture_repo, FixtureContext};
    use tempfile::tempdir;

    #[test]
    fn commit_and_amend() -> Result<()> {
        let dir = tempdir()?;
        let _repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());
        let gateway = GitGateway::open()?;

        std::fs::write(dir.path().join("f.txt"), "one")?;
        gateway.stage_all()?;
        gateway.commit(&CommitMode::New {
            message: "add f".to_string(),
        })?;
        assert_eq!(gateway.commit_info("HEAD")?.subject, "add f");

        std::fs::write(dir.path().join("f.txt"), "two")?;
        gateway.stage_tracked()?;
        gateway.commit(&CommitMode::Amend {
            message: "add f (fixed)".to_string(),
        })?;
        assert_eq!(gateway.commit_info("HEAD")?.subject, "add f (fixed)");
        Ok(())
    }

    #[test]
    fn cherry_pick_produces_new_commit() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());
        let base = Oid::from(repo.head()?.peel_to_commit()?.id());

        branch_at_head(&repo, "side")?;
        checkout(&repo, "side")?;
        let picked = Oid::from(commit_file(&repo, "side.txt", "side", "side commit")?);
        checkout(&repo, "main")?;
        commit_file(&repo, "main.txt", "main", "main commit")?;

        let gateway = GitGateway::open()?;
        let main_tip = gateway.resolve("main")?;
        let new_id = gateway.cherry_pick_onto(&picked, &main_tip)?;
        assert_ne!(new_id, picked);
        assert_eq!(gateway.commit_info(new_id.as_str())?.subject, "side commit");
        // Original base untouched
        assert!(gateway.is_ancestor(base.as_str(), new_id.as_str())?);
        Ok(())
    }

    #[test]
    fn all_commits_upstream_detects_merged_work() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());

        branch_at_head(&repo, "feature")?;
        checkout(&repo, "feature")?;
        commit_file(&repo, "feat.txt", "work", "feature work")?;
        checkout(&repo, "main")?;

        let gateway = GitGateway::open()?;
        // Not merged yet
        assert!(!gateway.all_commits_upstream("main", "feature", None)?);

        // Fast-forward main over the feature commit
        let feature_tip = gateway.resolve("feature")?;
        gateway.reset_hard(feature_tip.as_str())?;
        assert!(gateway.all_commits_upstream("main", "feature", None)?);
        Ok(())
    }
}
