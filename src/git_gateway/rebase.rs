//! Fork-point rebase machinery.
//!
//! Restacks run `git rebase --onto <newBase> <oldBase> <tipSha>`: the tip is
//! given as a bare revision so git rebases a detached HEAD instead of the
//! branch ref. That keeps branch refs out of reach of other worktrees while
//! commits are replayed; the caller force-moves the ref on success.

use anyhow::{Context, Result};

use crate::git_backend::Oid;

use super::exec::{run_git, run_git_checked};
use super::GitGateway;

/// Result of attempting one rebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseAttempt {
    /// Replay finished; HEAD (detached) is at the new tip.
    Done { new_tip: Oid },
    /// Git stopped on conflicts; the rebase is left in progress.
    Conflict,
}

impl GitGateway {
    /// Replay the commits in `(old_base, tip]` onto `new_base`, detached.
    pub fn rebase_onto(&self, new_base: &Oid, old_base: &Oid, tip: &Oid) -> Result<RebaseAttempt> {
        let output = run_git(
            self.workdir(),
            &["rebase", "--onto", new_base.as_str(), old_base.as_str(), tip.as_str()],
        )?;

        if output.success() {
            return Ok(RebaseAttempt::Done {
                new_tip: self.head_revision()?,
            });
        }

        if self.rebase_in_progress() {
            return Ok(RebaseAttempt::Conflict);
        }

        // Neither success nor a conflict stop: surface the real failure
        run_git_checked(
            self.workdir(),
            &["rebase", "--onto", new_base.as_str(), old_base.as_str(), tip.as_str()],
        )
        .context("rebase failed")?;
        unreachable!("rebase succeeded on retry after failing without conflicts")
    }

    /// Continue an in-progress rebase after conflict resolution.
    ///
    /// `GIT_EDITOR=true` suppresses message editors so the call never blocks.
    pub fn rebase_continue(&self) -> Result<RebaseAttempt> {
        use std::process::{Command, Stdio};

        let output = Command::new("git")
            .args(["rebase", "--continue"])
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(self.workdir())
            .output()
            .context("failed to run git rebase --continue")?;

        if output.status.success() {
            Ok(RebaseAttempt::Done {
                new_tip: self.head_revision()?,
            })
        } else {
            Ok(RebaseAttempt::Conflict)
        }
    }

    /// Abort an in-progress rebase.
    pub fn rebase_abort(&self) -> Result<()> {
        run_git_checked(self.workdir(), &["rebase", "--abort"]).context("failed to abort rebase")?;
        Ok(())
    }

    /// A rebase is in progress when git's state directories exist.
    pub fn rebase_in_progress(&self) -> bool {
        self.git_dir().join("rebase-merge").exists() || self.git_dir().join("rebase-apply").exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{branch_at_head, checkout, commit_file, init_fixture_repo, FixtureContext};
    use tempfile::tempdir;

    #[test]
    fn rebase_onto_replays_owned_commits() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());
        let base = Oid::from(repo.head()?.peel_to_commit()?.id());

        // feature gets one commit on top of base
        branch_at_head(&repo, "feature")?;
        checkout(&repo, "feature")?;
        commit_file(&repo, "feature.txt", "work", "feature work")?;
        // main moves ahead independently
        checkout(&repo, "main")?;
        commit_file(&repo, "main.txt", "trunk", "trunk moves")?;

        let gateway = GitGateway::open()?;
        let new_base = gateway.resolve("main")?;
        let tip = gateway.resolve("feature")?;

        let attempt = gateway.rebase_onto(&new_base, &base, &tip)?;
        let new_tip = match attempt {
            RebaseAttempt::Done { new_tip } => new_tip,
            RebaseAttempt::Conflict => panic!("unexpected conflict"),
        };

        // New tip descends from the moved trunk and still has the feature work
        assert!(gateway.is_ancestor(new_base.as_str(), new_tip.as_str())?);
        assert_eq!(gateway.commit_info(new_tip.as_str())?.subject, "feature work");
        // Branch ref is untouched until the caller moves it
        assert_eq!(gateway.resolve("feature")?, tip);
        Ok(())
    }

    #[test]
    fn rebase_conflict_leaves_state_for_continue() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());
        let base = Oid::from(repo.head()?.peel_to_commit()?.id());

        branch_at_head(&repo, "feature")?;
        checkout(&repo, "feature")?;
        commit_file(&repo, "clash.txt", "feature version", "feature edit")?;
        checkout(&repo, "main")?;
        commit_file(&repo, "clash.txt", "trunk version", "trunk edit")?;

        let gateway = GitGateway::open()?;
        let new_base = gateway.resolve("main")?;
        let tip = gateway.resolve("feature")?;

        let attempt = gateway.rebase_onto(&new_base, &base, &tip)?;
        assert_eq!(attempt, RebaseAttempt::Conflict);
        assert!(gateway.rebase_in_progress());

        // Resolve and continue
        std::fs::write(dir.path().join("clash.txt"), "merged version")?;
        gateway.stage_all()?;
        let resumed = gateway.rebase_continue()?;
        assert!(matches!(resumed, RebaseAttempt::Done { .. }));
        assert!(!gateway.rebase_in_progress());
        Ok(())
    }

    #[test]
    fn rebase_abort_restores_clean_state() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let _ctx = FixtureContext::new(dir.path());
        let base = Oid::from(repo.head()?.peel_to_commit()?.id());

        branch_at_head(&repo, "feature")?;
        checkout(&repo, "feature")?;
        commit_file(&repo, "clash.txt", "feature version", "feature edit")?;
        checkout(&repo, "main")?;
        commit_file(&repo, "clash.txt", "trunk version", "trunk edit")?;

        let gateway = GitGateway::open()?;
        let new_base = gateway.resolve("main")?;
        let tip = gateway.resolve("feature")?;

        assert_eq!(gateway.rebase_onto(&new_base, &base, &tip)?, RebaseAttempt::Conflict);
        gateway.rebase_abort()?;
        assert!(!gateway.rebase_in_progress());
        Ok(())
    }
}
