//! The stack engine: branch DAG, invariants, and the algorithms that
//! manipulate it.
//!
//! One `Engine` value per invocation owns the gateway, the metadata store,
//! and (when available) the host client; actions thread it explicitly
//! instead of reaching for process-wide state, and tests construct fresh
//! instances against fixture repositories.

pub mod foreach;
pub mod graph;
pub mod plan;
pub mod reorder;
pub mod restack;
pub mod sync;
pub mod track;

pub use foreach::ForeachReport;
pub use graph::{StackGraph, StackRange};
pub use plan::{MergeStrategy, Plan, Step, StepKind, Validation};
pub use restack::RestackOutcome;
pub use sync::{PullResult, SyncOptions, SyncReport};

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::errors::StackError;
use crate::events::{Event, EventSink};
use crate::forge::HostClient;
use crate::git_gateway::GitGateway;
use crate::metadata::MetadataStore;

/// Branch names tried when no trunk is configured.
const TRUNK_CANDIDATES: &[&str] = &["main", "master", "develop", "development"];

pub struct Engine {
    gateway: GitGateway,
    store: MetadataStore,
    host: Option<Box<dyn HostClient>>,
    config: Config,
    trunk: String,
    graph: StackGraph,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("trunk", &self.trunk)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the repository, resolve the trunk, and load the graph.
    pub async fn load(sink: Arc<dyn EventSink>) -> Result<Self> {
        Self::load_with_host(sink, None).await
    }

    /// Same, with an explicit host client (tests pass the mock; the CLI
    /// attaches the real host lazily only for commands that need it).
    pub async fn load_with_host(sink: Arc<dyn EventSink>, host: Option<Box<dyn HostClient>>) -> Result<Self> {
        let probe = GitGateway::open()?;
        let repo_root = probe.workdir().to_path_buf();
        let config = Config::load(&repo_root)?;

        let gateway = GitGateway::from_path(&repo_root)?.with_remote(config.remote.clone());
        let store = MetadataStore::from_gateway(GitGateway::from_path(&repo_root)?.with_remote(config.remote.clone()));

        let trunk = resolve_trunk(&gateway, &config)?;
        let graph = StackGraph::load(&gateway, &store, &trunk).await?;

        let engine = Self {
            gateway,
            store,
            host,
            config,
            trunk,
            graph,
            sink,
        };
        engine.report_diagnostics();
        Ok(engine)
    }

    fn report_diagnostics(&self) {
        for (branch, reason) in self.graph.demoted() {
            self.emit(Event::BranchDemoted {
                branch: branch.clone(),
                reason: reason.clone(),
            });
        }
        for branch in self.graph.tracked_branches() {
            if self.graph.node(&branch).is_some_and(|node| node.needs_restack) {
                self.emit(Event::Warning {
                    message: format!(
                        "'{}' has a recorded base that is no longer in its history; run '{} restack'",
                        branch,
                        crate::program_name::program_name()
                    ),
                });
            }
        }
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn graph(&self) -> &StackGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut StackGraph {
        &mut self.graph
    }

    pub fn gateway(&self) -> &GitGateway {
        &self.gateway
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> Result<&dyn HostClient> {
        self.host
            .as_deref()
            .ok_or_else(|| StackError::Host("no pull-request host is configured for this repository".into()).into())
    }

    pub fn has_host(&self) -> bool {
        self.host.is_some()
    }

    /// Rebuild the graph from disk after external changes.
    pub async fn reload_graph(&mut self) -> Result<()> {
        self.graph = StackGraph::load(&self.gateway, &self.store, &self.trunk).await?;
        self.report_diagnostics();
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        self.sink.emit(&event);
    }

    /// Fail fast when the worktree has staged or modified tracked files.
    /// Untracked files are fine; rebases and checkouts carry them along.
    pub(crate) fn require_clean_worktree(&self) -> Result<()> {
        if self.gateway.has_staged_or_modified_changes()? {
            return Err(StackError::Precondition(
                "uncommitted changes in the worktree; commit or stash them first".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// Configured trunk, or infer one.
///
/// Inference: a single local branch backed by a remote-tracking ref wins;
/// otherwise exactly one of the conventional names must exist locally.
fn resolve_trunk(gateway: &GitGateway, config: &Config) -> Result<String> {
    if let Some(trunk) = &config.trunk {
        if !gateway.branch_exists(trunk)? {
            return Err(StackError::Precondition(format!(
                "configured trunk '{}' does not exist in this repository",
                trunk
            ))
            .into());
        }
        return Ok(trunk.clone());
    }

    let locals = gateway.local_branches().context("failed to list branches")?;

    let mut remote_backed = Vec::new();
    for (name, _) in &locals {
        if gateway.remote_tracking_tip(name)?.is_some() {
            remote_backed.push(name.clone());
        }
    }
    if remote_backed.len() == 1 {
        return Ok(remote_backed.remove(0));
    }

    let mut named: Vec<String> = TRUNK_CANDIDATES
        .iter()
        .filter(|candidate| locals.iter().any(|(name, _)| name == *candidate))
        .map(|s| s.to_string())
        .collect();
    if named.len() == 1 {
        return Ok(named.remove(0));
    }

    Err(StackError::Precondition(format!(
        "cannot determine the trunk branch; run '{} init --trunk <branch>'",
        crate::program_name::program_name()
    ))
    .into())
}
