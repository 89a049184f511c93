//! `sta track`: start tracking a branch under a parent.

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;

/// `branch` defaults to the current branch, `parent` to the trunk.
pub async fn run(
    sink: Arc<dyn EventSink>,
    branch: Option<String>,
    parent: Option<String>,
    scope: Option<String>,
) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let branch = match branch {
        Some(branch) => branch,
        None => engine.gateway().require_current_branch()?,
    };
    let parent = parent.unwrap_or_else(|| engine.trunk().to_string());

    engine.track(&branch, &parent)?;

    if let Some(scope) = scope {
        let mut meta = engine.store().read(&branch)?;
        meta.scope = Some(scope);
        engine.store().write(&branch, &meta)?;
    }
    Ok(())
}
