//! Reorder the downstack chain under a user-edited permutation.

use std::collections::HashSet;

use anyhow::Result;

use crate::errors::StackError;
use crate::events::Event;
use crate::state::OperationKind;

use super::restack::RestackOutcome;
use super::Engine;

impl Engine {
    /// Apply a permutation of the chain from trunk to `current`.
    ///
    /// `new_order` must contain exactly the branches of the current chain,
    /// bottom to top. Identity permutations are a no-op. The whole rebase
    /// schedule, including each branch's pre-reorder base, is derived
    /// before the first metadata write, so a reader sees either the old
    /// edges or the new ones, never a mix of schedule and state.
    pub fn reorder(&mut self, current: &str, new_order: &[String]) -> Result<RestackOutcome> {
        if self.graph().is_trunk(current) {
            return Err(StackError::User("cannot reorder from the trunk; check out a stack branch".into()).into());
        }
        if !self.graph().is_tracked(current) {
            return Err(StackError::User(format!("branch '{}' is not tracked", current)).into());
        }

        let old_order = self.graph().full_stack(current)?;
        if old_order.len() < 2 {
            return Err(StackError::Precondition("fewer than two branches in the stack; nothing to reorder".into()).into());
        }

        validate_permutation(&old_order, new_order)?;

        if new_order == old_order.as_slice() {
            self.emit(Event::Notice {
                message: "order unchanged; nothing to do".to_string(),
            });
            return Ok(RestackOutcome::Completed {
                rebased: vec![],
                up_to_date: old_order,
            });
        }

        self.require_clean_worktree()?;

        // Descendants hanging off the chain but not part of the permutation
        // keep their own parentage and simply follow along in the restack.
        let member_set: HashSet<&String> = new_order.iter().collect();
        let mut outside_descendants: Vec<String> = Vec::new();
        for branch in &old_order {
            for descendant in self.graph().descendants(branch)? {
                if !member_set.contains(&descendant) && !outside_descendants.contains(&descendant) {
                    outside_descendants.push(descendant);
                }
            }
        }

        // Rewrite the chain edges. Recorded bases stay untouched: each still
        // names the revision whose descendants are the branch's own commits,
        // which is exactly what the restack replays onto the new parent.
        let trunk = self.trunk().to_string();
        for (position, branch) in new_order.iter().enumerate() {
            let parent = if position == 0 {
                trunk.clone()
            } else {
                new_order[position - 1].clone()
            };
            let mut meta = self.store().read(branch)?;
            if meta.parent_branch_name.as_deref() != Some(parent.as_str()) {
                meta.parent_branch_name = Some(parent.clone());
                self.store().write(branch, &meta)?;
                self.graph_mut().set_parent(branch, &parent);
            }
        }

        let mut to_restack: Vec<String> = new_order.to_vec();
        to_restack.extend(outside_descendants);
        self.restack_branches(OperationKind::Reorder, &to_restack)
    }
}

fn validate_permutation(old_order: &[String], new_order: &[String]) -> Result<()> {
    let old_set: HashSet<&String> = old_order.iter().collect();
    let new_set: HashSet<&String> = new_order.iter().collect();

    if new_order.len() != new_set.len() {
        return Err(StackError::User("duplicate branch names in the new order".into()).into());
    }
    for name in &new_set {
        if !old_set.contains(*name) {
            return Err(StackError::User(format!(
                "'{}' is not part of this stack; only the current chain can be reordered",
                name
            ))
            .into());
        }
    }
    for name in &old_set {
        if !new_set.contains(*name) {
            return Err(StackError::User(format!(
                "branch '{}' was removed from the list; to drop it from the stack, untrack it explicitly",
                name
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::{fixture, load_engine, track_branch};
    use crate::test_context::{branch_at_head, checkout, commit_file};

    /// main ← a ← b with one commit each, checked out at b.
    async fn two_branch_stack() -> Result<(tempfile::TempDir, git2::Repository, crate::test_context::FixtureContext)>
    {
        let (dir, repo, ctx) = fixture()?;
        branch_at_head(&repo, "a")?;
        checkout(&repo, "a")?;
        commit_file(&repo, "a.txt", "a", "a1")?;
        branch_at_head(&repo, "b")?;
        checkout(&repo, "b")?;
        commit_file(&repo, "b.txt", "b", "b1")?;
        track_branch(dir.path(), "a", "main")?;
        track_branch(dir.path(), "b", "a")?;
        Ok((dir, repo, ctx))
    }

    #[tokio::test]
    async fn swap_inverts_parent_links_and_geometry() -> Result<()> {
        // S2: [a, b] → [b, a]
        let (_dir, _repo, _ctx) = two_branch_stack().await?;
        let mut engine = load_engine().await?;

        let outcome = engine.reorder("b", &["b".to_string(), "a".to_string()])?;
        assert!(outcome.conflicted().is_none());

        assert_eq!(engine.store().read("b")?.parent_branch_name.as_deref(), Some("main"));
        assert_eq!(engine.store().read("a")?.parent_branch_name.as_deref(), Some("b"));

        let gateway = engine.gateway();
        let main_tip = gateway.resolve("main")?;
        let b_tip = gateway.resolve("b")?;
        let a_tip = gateway.resolve("a")?;
        assert!(gateway.is_ancestor(main_tip.as_str(), b_tip.as_str())?);
        assert!(gateway.is_ancestor(b_tip.as_str(), a_tip.as_str())?);

        // Nothing has fallen behind: bases equal parent tips
        assert_eq!(
            engine.store().read("b")?.parent_branch_revision.as_deref(),
            Some(main_tip.as_str())
        );
        assert_eq!(
            engine.store().read("a")?.parent_branch_revision.as_deref(),
            Some(b_tip.as_str())
        );
        for branch in ["a", "b"] {
            assert!(!engine.graph().node(branch).unwrap().needs_restack);
        }
        Ok(())
    }

    #[tokio::test]
    async fn identity_is_a_no_op() -> Result<()> {
        let (_dir, _repo, _ctx) = two_branch_stack().await?;
        let mut engine = load_engine().await?;

        let a_tip = engine.gateway().resolve("a")?;
        let b_tip = engine.gateway().resolve("b")?;

        let outcome = engine.reorder("b", &["a".to_string(), "b".to_string()])?;
        assert!(matches!(outcome, RestackOutcome::Completed { ref rebased, .. } if rebased.is_empty()));
        assert_eq!(engine.gateway().resolve("a")?, a_tip);
        assert_eq!(engine.gateway().resolve("b")?, b_tip);
        Ok(())
    }

    #[tokio::test]
    async fn removed_branch_is_an_error_suggesting_untrack() -> Result<()> {
        let (_dir, _repo, _ctx) = two_branch_stack().await?;
        let mut engine = load_engine().await?;

        let err = engine.reorder("b", &["b".to_string()]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("removed"), "got: {}", message);
        assert!(message.contains("untrack"), "got: {}", message);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_duplicate_names_are_rejected() -> Result<()> {
        let (_dir, _repo, _ctx) = two_branch_stack().await?;
        let mut engine = load_engine().await?;

        assert!(engine
            .reorder("b", &["a".to_string(), "mystery".to_string()])
            .is_err());
        assert!(engine.reorder("b", &["a".to_string(), "a".to_string()]).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn outside_descendants_follow_their_parent() -> Result<()> {
        // main ← a ← b (chain via b) plus a ← side, outside the permutation
        let (dir, repo, _ctx) = two_branch_stack().await?;
        checkout(&repo, "a")?;
        branch_at_head(&repo, "side")?;
        checkout(&repo, "side")?;
        commit_file(&repo, "side.txt", "s", "s1")?;
        checkout(&repo, "b")?;
        track_branch(dir.path(), "side", "a")?;

        let mut engine = load_engine().await?;
        let outcome = engine.reorder("b", &["b".to_string(), "a".to_string()])?;
        assert!(outcome.conflicted().is_none());

        // side keeps its own parent and sits on a's new tip
        assert_eq!(engine.store().read("side")?.parent_branch_name.as_deref(), Some("a"));
        let gateway = engine.gateway();
        let a_tip = gateway.resolve("a")?;
        let side_tip = gateway.resolve("side")?;
        assert!(gateway.is_ancestor(a_tip.as_str(), side_tip.as_str())?);
        Ok(())
    }
}
