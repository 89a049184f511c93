//! `sta restack`: rebase branches onto their recorded parents' tips.

use std::sync::Arc;

use anyhow::Result;

use crate::engine::StackRange;
use crate::events::EventSink;
use crate::state::OperationKind;

/// Which part of the graph to restack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestackScope {
    /// Every tracked branch.
    All,
    /// Only the named branch.
    Only,
    /// The branch and all its descendants (default).
    Upstack,
    /// Ancestors from the branch down to the trunk.
    Downstack,
}

pub async fn run(sink: Arc<dyn EventSink>, branch: Option<String>, scope: RestackScope) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let start = match &branch {
        Some(name) => name.clone(),
        None => engine.gateway().require_current_branch()?,
    };

    let targets: Vec<String> = match scope {
        RestackScope::All => engine.graph().tracked_branches(),
        RestackScope::Only => vec![start],
        RestackScope::Upstack => engine.graph().relative_stack(&start, StackRange::UPSTACK)?,
        RestackScope::Downstack => engine.graph().relative_stack(&start, StackRange::DOWNSTACK)?,
    };

    let outcome = engine.restack_branches(OperationKind::Restack, &targets)?;
    super::into_conflict_error(outcome)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::{fixture, track_branch};
    use crate::events::MemorySink;
    use crate::test_context::{branch_at_head, checkout, commit_file};

    #[tokio::test]
    async fn restack_all_rebases_behind_branches() -> Result<()> {
        let (dir, repo, _ctx) = fixture()?;
        branch_at_head(&repo, "a")?;
        checkout(&repo, "a")?;
        commit_file(&repo, "a.txt", "a", "a1")?;
        checkout(&repo, "main")?;
        track_branch(dir.path(), "a", "main")?;
        commit_file(&repo, "m.txt", "m", "m1")?;

        run(Arc::new(MemorySink::new()), None, RestackScope::All).await?;

        let gateway = crate::git_gateway::GitGateway::from_path(dir.path())?;
        let main_tip = gateway.resolve("main")?;
        let a_tip = gateway.resolve("a")?;
        assert!(gateway.is_ancestor(main_tip.as_str(), a_tip.as_str())?);
        Ok(())
    }

    #[tokio::test]
    async fn restack_only_unknown_branch_fails() -> Result<()> {
        let (_dir, _repo, _ctx) = fixture()?;
        let err = run(
            Arc::new(MemorySink::new()),
            Some("ghost".to_string()),
            RestackScope::Only,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not tracked"));
        Ok(())
    }
}
