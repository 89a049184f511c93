//! The sync pipeline: pull trunk, refresh PR snapshots, clean merged and
//! closed branches, then (optionally) restack what moved.
//!
//! Phases run strictly in order but are independent: a host hiccup in the
//! refresh phase never blocks cleanup, and per-branch failures are reported
//! without sinking the rest of the batch.

use anyhow::Result;

use crate::errors::StackError;
use crate::events::{CleanReason, Event};
use crate::forge::get_prs_by_branches;
use crate::metadata::PrState;
use crate::state::OperationKind;

use super::restack::RestackOutcome;
use super::Engine;

/// Outcome of the trunk-pull phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResult {
    /// Trunk was fast-forwarded to its remote.
    Done,
    /// Already up to date (or no remote to pull from).
    Unneeded,
    /// Trunk and its remote have diverged.
    Conflict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// On a diverged trunk, hard-reset it to the remote.
    pub force: bool,
    /// Skip the merged/closed cleanup phase.
    pub no_cleanup: bool,
    /// Restack the current stack and everything the sync moved.
    pub restack: bool,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub pull: Option<PullResult>,
    pub refreshed: Vec<String>,
    pub refresh_failures: Vec<(String, String)>,
    /// Branches whose PR base on the remote no longer matches the recorded
    /// parent.
    pub base_changed: Vec<String>,
    pub cleaned: Vec<String>,
    /// Children rewired to a grandparent by cleanup.
    pub rewired: Vec<String>,
    pub restack: Option<RestackOutcome>,
}

impl Engine {
    pub async fn sync(&mut self, options: &SyncOptions) -> Result<SyncReport> {
        // Phase 1: preconditions
        self.require_clean_worktree()?;
        if self.gateway().rebase_in_progress() {
            return Err(StackError::Precondition(format!(
                "a rebase is in progress; run '{} continue' or '{} abort' first",
                crate::program_name::program_name(),
                crate::program_name::program_name()
            ))
            .into());
        }

        let mut report = SyncReport::default();

        // Phase 2: pull trunk
        let pull = self.pull_trunk(options.force).await?;
        self.emit(Event::TrunkPulled {
            trunk: self.trunk().to_string(),
            result: pull,
        });
        report.pull = Some(pull);

        // Phase 3: refresh PR snapshots
        self.refresh_pr_info(&mut report).await?;

        // Phase 4: clean merged/closed branches
        if !options.no_cleanup {
            self.clean_merged(&mut report)?;
        }

        // Phase 5: restack
        if options.restack {
            let mut set: Vec<String> = Vec::new();
            if let Some(current) = self.gateway().current_branch()? {
                if self.graph().is_tracked(&current) {
                    set.extend(self.graph().full_stack(&current)?);
                }
            }
            set.extend(report.base_changed.iter().cloned());
            set.extend(report.rewired.iter().cloned());
            set.retain(|name| self.graph().is_tracked(name));
            set.sort();
            set.dedup();

            if !set.is_empty() {
                report.restack = Some(self.restack_branches(OperationKind::Sync, &set)?);
            }
        }

        Ok(report)
    }

    /// Fetch and fast-forward the trunk. Divergence is only overwritten
    /// under `force`; otherwise it is reported and left alone.
    async fn pull_trunk(&mut self, force: bool) -> Result<PullResult> {
        if !self.gateway().has_remote()? {
            return Ok(PullResult::Unneeded);
        }

        self.emit(Event::FetchStarted {
            remote: self.gateway().remote().to_string(),
        });
        if let Err(err) = self.gateway().fetch_prune().await {
            self.emit(Event::Warning {
                message: format!("fetch failed, continuing with local refs: {:#}", err),
            });
            return Ok(PullResult::Unneeded);
        }

        let trunk = self.trunk().to_string();
        let Some(remote_tip) = self.gateway().remote_tracking_tip(&trunk)? else {
            return Ok(PullResult::Unneeded);
        };
        let local_tip = self.gateway().resolve(&trunk)?;
        if local_tip == remote_tip {
            return Ok(PullResult::Unneeded);
        }

        let on_trunk = self.gateway().current_branch()? == Some(trunk.clone());
        if self.gateway().is_ancestor(local_tip.as_str(), remote_tip.as_str())? {
            if on_trunk {
                self.gateway().merge_ff_only(remote_tip.as_str())?;
            } else {
                self.gateway().force_branch_ref(&trunk, &remote_tip)?;
            }
            self.graph_mut().set_tip(&trunk, remote_tip);
            return Ok(PullResult::Done);
        }

        // Diverged
        if force {
            if on_trunk {
                self.gateway().reset_hard(remote_tip.as_str())?;
            } else {
                self.gateway().force_branch_ref(&trunk, &remote_tip)?;
            }
            self.graph_mut().set_tip(&trunk, remote_tip);
        }
        Ok(PullResult::Conflict)
    }

    /// Mirror host PR state into metadata. Failures are per-branch and the
    /// phase always runs to completion.
    async fn refresh_pr_info(&mut self, report: &mut SyncReport) -> Result<()> {
        let tracked = self.graph().tracked_branches();
        if tracked.is_empty() {
            return Ok(());
        }
        let results = match self.host.as_deref() {
            None => return Ok(()),
            Some(host) => get_prs_by_branches(host, &tracked).await,
        };

        for (branch, result) in results {
            match result {
                Ok(Some(pr)) => {
                    let mut meta = self.store().read(&branch)?;
                    let parent = meta.parent_branch_name.clone();
                    let remote_base = pr.base_branch.clone();
                    self.emit(Event::PrRefreshed {
                        branch: branch.clone(),
                        number: pr.number,
                        state: pr.state,
                    });
                    meta.pr_info = Some(pr);
                    self.store().write(&branch, &meta)?;
                    self.graph_mut().set_meta(&branch, meta);

                    if let (Some(remote_base), Some(parent)) = (remote_base, parent) {
                        if remote_base != parent {
                            self.emit(Event::BaseChanged {
                                branch: branch.clone(),
                                remote_base,
                            });
                            report.base_changed.push(branch.clone());
                        }
                    }
                    report.refreshed.push(branch);
                }
                Ok(None) => {}
                Err(err) => {
                    let message = format!("{:#}", err);
                    self.emit(Event::PrRefreshFailed {
                        branch: branch.clone(),
                        error: message.clone(),
                    });
                    report.refresh_failures.push((branch, message));
                }
            }
        }
        Ok(())
    }

    /// Delete branches whose work has landed, rewiring their children to
    /// the grandparent. Host state is authoritative; the owned-commit
    /// reachability test only fills in when no PR is recorded.
    fn clean_merged(&mut self, report: &mut SyncReport) -> Result<()> {
        let ordered = {
            let tracked = self.graph().tracked_branches();
            self.graph().sort_topologically(&tracked)
        };

        for branch in ordered {
            let node = match self.graph().node(&branch) {
                Some(node) => node,
                None => continue,
            };
            let reason = match &node.meta.pr_info {
                Some(pr) => match pr.state {
                    PrState::Merged => Some(CleanReason::PrMerged),
                    PrState::Closed => Some(CleanReason::PrClosed),
                    PrState::Open => None,
                },
                None => {
                    let trunk = self.trunk().to_string();
                    let since = node.meta.parent_branch_revision.clone();
                    if self
                        .gateway()
                        .all_commits_upstream(&trunk, &branch, since.as_deref())?
                    {
                        Some(CleanReason::CommitsUpstream)
                    } else {
                        None
                    }
                }
            };
            let Some(reason) = reason else { continue };

            let parent = self
                .graph()
                .parent_of(&branch)
                .unwrap_or(self.trunk())
                .to_string();

            // Children move up to the grandparent; their recorded bases
            // still bound their own commits, so a later restack replays
            // exactly the right range.
            for child in self.graph().children_of(&branch) {
                let mut meta = self.store().read(&child)?;
                meta.parent_branch_name = Some(parent.clone());
                self.store().write(&child, &meta)?;
                self.graph_mut().set_parent(&child, &parent);
                self.emit(Event::ChildRewired {
                    child: child.clone(),
                    new_parent: parent.clone(),
                });
                report.rewired.push(child);
            }

            // Never delete the branch under our feet
            if self.gateway().current_branch()? == Some(branch.clone()) {
                let trunk = self.trunk().to_string();
                self.gateway().checkout(&trunk)?;
            }
            self.gateway().delete_branch(&branch)?;
            self.store().delete(&branch)?;
            self.graph_mut().remove(&branch);
            self.emit(Event::BranchCleaned {
                branch: branch.clone(),
                reason,
            });
            report.cleaned.push(branch);
        }
        Ok(())
    }
}
