//! Track, untrack, and move.

use anyhow::Result;

use crate::errors::StackError;
use crate::events::Event;
use crate::state::OperationKind;

use super::restack::RestackOutcome;
use super::Engine;

impl Engine {
    /// Record `parent` for `child` without rebasing anything. The recorded
    /// base is the parent's current tip.
    pub fn track(&mut self, child: &str, parent: &str) -> Result<()> {
        if child == self.trunk() {
            return Err(StackError::User(format!("'{}' is the trunk; it has no parent", child)).into());
        }
        if child == parent {
            return Err(StackError::User(format!("'{}' cannot be its own parent", child)).into());
        }
        if !self.gateway().branch_exists(child)? {
            return Err(StackError::User(format!("branch '{}' does not exist", child)).into());
        }
        if !self.graph().is_trunk(parent) && !self.graph().is_tracked(parent) {
            return Err(StackError::User(format!(
                "parent '{}' is neither tracked nor the trunk; track it first",
                parent
            ))
            .into());
        }
        // A parent below its own descendant would close a cycle
        if self.graph().is_descendant(parent, child) {
            return Err(StackError::User(format!(
                "cannot track '{}' under '{}': the parent is a descendant of the child",
                child, parent
            ))
            .into());
        }

        let revision = self.gateway().resolve(parent)?;
        let tip = self.gateway().resolve(child)?;

        let mut meta = self.store().read(child)?;
        meta.parent_branch_name = Some(parent.to_string());
        meta.parent_branch_revision = Some(revision.as_str().to_string());
        self.store().write(child, &meta)?;

        if self.graph().is_tracked(child) {
            self.graph_mut().set_parent(child, parent);
            self.graph_mut().set_meta(child, meta);
            self.graph_mut().set_tip(child, tip);
        } else {
            self.graph_mut().insert_tracked(child, tip, meta);
        }

        self.emit(Event::BranchTracked {
            branch: child.to_string(),
            parent: parent.to_string(),
        });
        Ok(())
    }

    /// Delete a branch's metadata. The git branch stays; children lose their
    /// link to the graph until re-tracked.
    pub fn untrack(&mut self, branch: &str) -> Result<()> {
        if branch == self.trunk() {
            return Err(StackError::User("the trunk is not tracked".to_string()).into());
        }
        if !self.graph().is_tracked(branch) && self.store().read(branch)?.is_empty() {
            return Err(StackError::User(format!("branch '{}' is not tracked", branch)).into());
        }

        self.store().delete(branch)?;

        // The branch and everything hanging off it leave the in-memory
        // graph; the children's on-disk metadata stays for re-tracking.
        let mut orphaned = self.graph().descendants(branch).unwrap_or_default();
        orphaned.reverse();
        for name in &orphaned {
            self.graph_mut().remove(name);
            self.emit(Event::BranchDemoted {
                branch: name.clone(),
                reason: format!("ancestor '{}' was untracked", branch),
            });
        }
        self.graph_mut().remove(branch);

        self.emit(Event::BranchUntracked {
            branch: branch.to_string(),
        });
        Ok(())
    }

    /// Reparent `source` onto `onto` and restack it with all descendants.
    ///
    /// The moved branch keeps its recorded base until the restack advances
    /// it, so only its own commits are replayed onto the new parent.
    pub fn move_branch(&mut self, source: &str, onto: &str) -> Result<RestackOutcome> {
        if !self.graph().is_tracked(source) {
            return Err(StackError::User(format!("branch '{}' is not tracked", source)).into());
        }
        if self.graph().is_trunk(source) {
            return Err(StackError::User("cannot move the trunk".to_string()).into());
        }
        if source == onto {
            return Err(StackError::User(format!("cannot move '{}' onto itself", source)).into());
        }
        if !self.graph().is_trunk(onto) && !self.graph().is_tracked(onto) {
            return Err(StackError::User(format!(
                "target '{}' is neither tracked nor the trunk",
                onto
            ))
            .into());
        }
        if self.graph().is_descendant(onto, source) {
            return Err(StackError::User(format!(
                "cannot move '{}' onto '{}': the target is a descendant and the move would create a cycle",
                source, onto
            ))
            .into());
        }
        self.require_clean_worktree()?;

        // Rewrite the edge; the old parentBranchRevision stays in place as
        // the rebase base.
        let mut meta = self.store().read(source)?;
        meta.parent_branch_name = Some(onto.to_string());
        self.store().write(source, &meta)?;
        self.graph_mut().set_parent(source, onto);

        self.emit(Event::BranchMoved {
            branch: source.to_string(),
            onto: onto.to_string(),
        });

        let mut to_restack = vec![source.to_string()];
        to_restack.extend(self.graph().descendants(source)?);
        self.restack_branches(OperationKind::Move, &to_restack)
    }
}
