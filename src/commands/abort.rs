//! `sta abort`: abandon the interrupted operation.

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;

pub async fn run(sink: Arc<dyn EventSink>) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;
    engine.abort_restack()
}
