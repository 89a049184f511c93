//! `sta create`: new branch at HEAD, tracked on the current branch.

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;
use crate::git_gateway::CommitMode;

pub async fn run(
    sink: Arc<dyn EventSink>,
    name: String,
    stage_all: bool,
    message: Option<String>,
) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let parent = engine
        .gateway()
        .current_branch()?
        .unwrap_or_else(|| engine.trunk().to_string());

    engine.gateway().create_branch_at(&name, "HEAD")?;
    engine.gateway().checkout(&name)?;
    engine.track(&name, &parent)?;

    if let Some(message) = message {
        if stage_all {
            engine.gateway().stage_all()?;
        } else {
            engine.gateway().stage_tracked()?;
        }
        engine.gateway().commit(&CommitMode::New { message })?;
    }
    Ok(())
}
