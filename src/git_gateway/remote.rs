//! Remote operations: fetch, push, ls-remote.
//!
//! These are the calls that can hang on a bad network, so they run through
//! the deadline-enforcing async runner.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::errors::StackError;
use crate::git_backend::Oid;

use super::exec::{run_git_checked, run_git_deadline, DEFAULT_DEADLINE};
use super::GitGateway;

impl GitGateway {
    /// Fetch from the configured remote, pruning deleted remote branches.
    pub async fn fetch_prune(&self) -> Result<()> {
        self.fetch_prune_with_deadline(DEFAULT_DEADLINE).await
    }

    pub async fn fetch_prune_with_deadline(&self, deadline: Duration) -> Result<()> {
        run_git_deadline(self.workdir(), &["fetch", "--prune", &self.remote().to_string()], deadline)
            .await
            .with_context(|| format!("fetch from '{}' failed", self.remote()))?;
        Ok(())
    }

    /// Push one branch with `--force-with-lease`. A rejected lease surfaces
    /// as `StackError::StaleRemoteInfo` so callers can tell the user to sync.
    pub async fn push_force_with_lease(&self, branch: &str) -> Result<()> {
        let remote = self.remote().to_string();
        let result = run_git_deadline(
            self.workdir(),
            &["push", "--force-with-lease", "--quiet", &remote, branch],
            DEFAULT_DEADLINE,
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.stderr.contains("stale info")
                    || err.stderr.contains("[rejected]")
                    || err.stderr.contains("fetch first")
                {
                    return Err(StackError::StaleRemoteInfo {
                        branch: branch.to_string(),
                    }
                    .into());
                }
                Err(err).with_context(|| format!("push of '{}' failed", branch))
            }
        }
    }

    /// Remote branch heads via `ls-remote --heads`, as (name, tip) pairs.
    #[allow(dead_code)]
    pub async fn remote_heads(&self) -> Result<Vec<(String, Oid)>> {
        let remote = self.remote().to_string();
        let output = run_git_deadline(self.workdir(), &["ls-remote", "--heads", &remote], DEFAULT_DEADLINE)
            .await
            .with_context(|| format!("ls-remote against '{}' failed", remote))?;

        let mut heads = Vec::new();
        for line in output.stdout.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(sha), Some(refname)) = (parts.next(), parts.next()) {
                if let Some(name) = refname.strip_prefix("refs/heads/") {
                    heads.push((name.to_string(), Oid::from_trusted(sha)));
                }
            }
        }
        Ok(heads)
    }

    /// Tip of the remote-tracking ref for a branch, if one exists locally.
    pub fn remote_tracking_tip(&self, branch: &str) -> Result<Option<Oid>> {
        let refname = format!("refs/remotes/{}/{}", self.remote(), branch);
        self.backend().find_reference(&refname)
    }

    /// Fast-forward-only merge of a revision into the current branch.
    pub fn merge_ff_only(&self, target: &str) -> Result<()> {
        run_git_checked(self.workdir(), &["merge", "--ff-only", target])
            .with_context(|| format!("fast-forward to {} failed", target))?;
        Ok(())
    }
}
