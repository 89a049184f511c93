//! Run a shell command across the stack.

use std::process::Command;

use anyhow::{Context, Result};

use crate::errors::StackError;
use crate::events::Event;

use super::graph::StackRange;
use super::Engine;

#[derive(Debug, Default)]
pub struct ForeachReport {
    /// (branch, exit code) in execution order.
    pub results: Vec<(String, i32)>,
    /// Branch whose non-zero exit stopped the walk, under fail-fast.
    pub halted_on: Option<String>,
}

impl ForeachReport {
    pub fn all_succeeded(&self) -> bool {
        self.halted_on.is_none() && self.results.iter().all(|(_, code)| *code == 0)
    }
}

impl Engine {
    /// Walk the current branch's stack within `range` (topological order),
    /// check out each branch, and run `command` through the shell. The
    /// original checkout is restored at the end.
    pub fn foreach(&mut self, range: StackRange, command: &str, fail_fast: bool) -> Result<ForeachReport> {
        if command.trim().is_empty() {
            return Err(StackError::User("foreach needs a command to run".into()).into());
        }
        self.require_clean_worktree()?;

        let current = self.gateway().require_current_branch()?;
        if !self.graph().is_tracked(&current) && !self.graph().is_trunk(&current) {
            return Err(StackError::User(format!("branch '{}' is not tracked", current)).into());
        }

        let branches = {
            let scoped = self.graph().relative_stack(&current, range)?;
            self.graph().sort_topologically(&scoped)
        };

        let mut report = ForeachReport::default();
        for branch in branches {
            self.emit(Event::ForeachRunning { branch: branch.clone() });
            self.gateway().checkout(&branch)?;

            let status = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(self.gateway().workdir())
                .status()
                .with_context(|| format!("failed to run '{}' on '{}'", command, branch))?;
            let code = status.code().unwrap_or(-1);

            self.emit(Event::ForeachExited {
                branch: branch.clone(),
                code,
            });
            report.results.push((branch.clone(), code));

            if fail_fast && code != 0 {
                report.halted_on = Some(branch);
                break;
            }
        }

        self.gateway().checkout(&current)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::{fixture, load_engine, track_branch};
    use crate::test_context::{branch_at_head, checkout, commit_file};

    /// main ← a ← b ← c, one commit each, checkout restored to a.
    fn linear_stack() -> Result<(tempfile::TempDir, git2::Repository, crate::test_context::FixtureContext)> {
        let (dir, repo, ctx) = fixture()?;
        for (branch, parent) in [("a", "main"), ("b", "a"), ("c", "b")] {
            checkout(&repo, parent)?;
            branch_at_head(&repo, branch)?;
            checkout(&repo, branch)?;
            commit_file(&repo, &format!("{}.txt", branch), branch, &format!("{}1", branch))?;
            track_branch(dir.path(), branch, parent)?;
        }
        checkout(&repo, "a")?;
        Ok((dir, repo, ctx))
    }

    #[tokio::test]
    async fn foreach_visits_upstack_in_order_and_restores_checkout() -> Result<()> {
        let (dir, _repo, _ctx) = linear_stack()?;
        let mut engine = load_engine().await?;

        let log = dir.path().join("visited.log");
        let command = format!("git rev-parse --abbrev-ref HEAD >> {}", log.display());
        let report = engine.foreach(StackRange::UPSTACK, &command, false)?;

        assert!(report.all_succeeded());
        let visited = std::fs::read_to_string(&log)?;
        let names: Vec<&str> = visited.lines().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(engine.gateway().current_branch()?, Some("a".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() -> Result<()> {
        // S5: command fails on a; b and c never run
        let (_dir, _repo, _ctx) = linear_stack()?;
        let mut engine = load_engine().await?;

        let report = engine.foreach(StackRange::UPSTACK, "false", true)?;
        assert_eq!(report.halted_on.as_deref(), Some("a"));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].0, "a");
        assert_ne!(report.results[0].1, 0);
        assert!(!report.all_succeeded());
        Ok(())
    }

    #[tokio::test]
    async fn without_fail_fast_every_branch_reports_a_code() -> Result<()> {
        let (_dir, _repo, _ctx) = linear_stack()?;
        let mut engine = load_engine().await?;

        let report = engine.foreach(StackRange::UPSTACK, "false", false)?;
        assert!(report.halted_on.is_none());
        assert_eq!(report.results.len(), 3);
        assert!(report.results.iter().all(|(_, code)| *code != 0));
        Ok(())
    }

    #[tokio::test]
    async fn current_only_scope_runs_once() -> Result<()> {
        let (_dir, _repo, _ctx) = linear_stack()?;
        let mut engine = load_engine().await?;

        let report = engine.foreach(StackRange::CURRENT_ONLY, "true", true)?;
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0], ("a".to_string(), 0));
        Ok(())
    }
}
