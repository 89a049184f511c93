//! `sta untrack`: stop tracking a branch (the git branch stays).

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;

pub async fn run(sink: Arc<dyn EventSink>, branch: Option<String>) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let branch = match branch {
        Some(branch) => branch,
        None => engine.gateway().require_current_branch()?,
    };
    engine.untrack(&branch)
}
