//! Abstract pull-request host.
//!
//! The engine depends only on this capability set; the wire protocol lives
//! in the adapters. `GithubCli` shells out to `gh` (no credentials handled
//! in-process); `MockHost` serves tests. Enterprise hosts differ only in
//! hostname, which the adapter absorbs via the remote URL.

pub mod github;
pub mod mock;
pub mod types;

pub use github::GithubCli;
pub use mock::MockHost;
pub use types::{CheckRun, ChecksSummary, MergeMethod, PrCreateParams, PrUpdateParams};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;

use crate::git_gateway::GitGateway;
use crate::metadata::PrInfo;

/// Capability set the engine consumes from the host.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// (owner, repo) this client talks to, derived from the remote URL.
    fn owner_repo(&self) -> (String, String);

    async fn get_pr_by_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PrInfo>>;

    async fn create_pr(&self, owner: &str, repo: &str, params: &PrCreateParams) -> Result<PrInfo>;

    async fn update_pr(&self, owner: &str, repo: &str, number: u64, params: &PrUpdateParams) -> Result<()>;

    async fn merge_pr(&self, branch: &str, method: MergeMethod) -> Result<()>;

    async fn close_pr(&self, number: u64) -> Result<()>;

    async fn get_checks(&self, branch: &str) -> Result<ChecksSummary>;
}

impl std::fmt::Debug for dyn HostClient + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (owner, repo) = self.owner_repo();
        f.debug_struct("dyn HostClient").field("owner", &owner).field("repo", &repo).finish()
    }
}

/// Batch PR lookup with bounded fan-out. Per-branch failures come back next
/// to the successes; one flaky call must not sink a whole sync.
pub async fn get_prs_by_branches(
    host: &dyn HostClient,
    branches: &[String],
) -> Vec<(String, Result<Option<PrInfo>>)> {
    let (owner, repo) = host.owner_repo();
    stream::iter(branches.iter().cloned())
        .map(|branch| {
            let owner = owner.clone();
            let repo = repo.clone();
            async move {
                let result = host.get_pr_by_branch(&owner, &repo, &branch).await;
                (branch, result)
            }
        })
        .buffer_unordered(8)
        .collect()
        .await
}

/// Build the default host client for a repository's configured remote.
pub fn host_for_remote(gateway: &GitGateway) -> Result<Box<dyn HostClient>> {
    let url = gateway.remote_url()?;
    let (owner, repo) = parse_owner_repo(&url)?;
    Ok(Box::new(GithubCli::new(gateway.workdir().to_path_buf(), owner, repo)))
}

/// Extract (owner, repo) from ssh/https/scp-style remote URLs. The hostname
/// is irrelevant here; enterprise hosts parse identically.
pub fn parse_owner_repo(url: &str) -> Result<(String, String)> {
    let re = Regex::new(r"[:/](?P<owner>[^/:]+)/(?P<repo>[^/:]+?)(?:\.git)?/?$").expect("static regex");
    let caps = re
        .captures(url.trim())
        .ok_or_else(|| anyhow::anyhow!("cannot parse owner/repo from remote url '{}'", url))?;
    Ok((caps["owner"].to_string(), caps["repo"].to_string()))
}
