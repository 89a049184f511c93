//! `sta continue`: resume the interrupted operation after conflict
//! resolution.

use std::sync::Arc;

use anyhow::Result;

use crate::events::EventSink;

pub async fn run(sink: Arc<dyn EventSink>) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let outcome = engine.continue_restack()?;
    super::into_conflict_error(outcome)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::fixture;
    use crate::events::MemorySink;

    #[tokio::test]
    async fn continue_without_operation_fails() -> Result<()> {
        let (_dir, _repo, _ctx) = fixture()?;
        let err = run(Arc::new(MemorySink::new())).await.unwrap_err();
        assert!(err.to_string().contains("nothing to continue"));
        Ok(())
    }
}
