//! `sta submit`: push the current stack and create or update its PRs.
//!
//! Branches push in downstack order so every PR's base exists on the
//! remote before the PR that depends on it.

use std::sync::Arc;

use anyhow::Result;

use crate::errors::StackError;
use crate::events::{Event, EventSink};
use crate::forge::{PrCreateParams, PrUpdateParams};
use crate::metadata::PrState;

pub async fn run(sink: Arc<dyn EventSink>, draft: bool, reviewers: Vec<String>) -> Result<()> {
    let engine = super::load_engine_with_host(sink.clone()).await?;
    let _lock = super::lock_operations(&engine)?;
    engine.require_clean_worktree()?;

    let current = engine.gateway().require_current_branch()?;
    if engine.graph().is_trunk(&current) {
        return Err(StackError::User("cannot submit the trunk; check out a stack branch".into()).into());
    }
    if !engine.graph().is_tracked(&current) {
        return Err(StackError::User(format!("branch '{}' is not tracked", current)).into());
    }

    let chain = engine.graph().full_stack(&current)?;
    let (owner, repo) = engine.host()?.owner_repo();

    for branch in chain {
        engine.gateway().push_force_with_lease(&branch).await?;
        sink.emit(&Event::BranchPushed { branch: branch.clone() });

        let mut meta = engine.store().read(&branch)?;
        let parent = meta
            .parent_branch_name
            .clone()
            .unwrap_or_else(|| engine.trunk().to_string());

        let existing = engine.host()?.get_pr_by_branch(&owner, &repo, &branch).await?;
        match existing {
            Some(pr) if pr.state == PrState::Open => {
                // Keep the base in lockstep with the recorded parent
                if pr.base_branch.as_deref() != Some(parent.as_str()) {
                    let params = PrUpdateParams {
                        base: Some(parent.clone()),
                        ..Default::default()
                    };
                    engine.host()?.update_pr(&owner, &repo, pr.number, &params).await?;
                    sink.emit(&Event::PrUpdated {
                        branch: branch.clone(),
                        number: pr.number,
                    });
                }
                meta.pr_info = Some(pr);
            }
            _ => {
                let subject = engine.gateway().commit_info(&branch)?.subject;
                let params = PrCreateParams {
                    title: subject,
                    body: String::new(),
                    head: branch.clone(),
                    base: parent.clone(),
                    draft,
                    reviewers: reviewers.clone(),
                    ..Default::default()
                };
                let pr = engine.host()?.create_pr(&owner, &repo, &params).await?;
                sink.emit(&Event::PrCreated {
                    branch: branch.clone(),
                    number: pr.number,
                    url: pr.url.clone().unwrap_or_default(),
                });
                meta.pr_info = Some(pr);
            }
        }
        engine.store().write(&branch, &meta)?;
    }
    Ok(())
}
