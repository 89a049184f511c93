//! `sta move`: reparent a branch (and its subtree) onto a new parent.

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;

pub async fn run(sink: Arc<dyn EventSink>, onto: String, source: Option<String>) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let source = match source {
        Some(name) => name,
        None => engine.gateway().require_current_branch()?,
    };

    let outcome = engine.move_branch(&source, &onto)?;
    super::into_conflict_error(outcome)?;
    Ok(())
}
