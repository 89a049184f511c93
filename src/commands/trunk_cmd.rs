//! `sta trunk`: show or set the trunk branch.

use std::sync::Arc;

use anyhow::Result;

use crate::events::{Event, EventSink};

pub async fn run(sink: Arc<dyn EventSink>, set: Option<String>) -> Result<()> {
    match set {
        Some(trunk) => super::init::run(sink, Some(trunk)).await,
        None => {
            let engine = super::load_engine(sink.clone()).await?;
            sink.emit(&Event::Notice {
                message: format!("trunk is '{}'", engine.trunk()),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::fixture;
    use crate::events::{Event, MemorySink};

    #[tokio::test]
    async fn show_reports_resolved_trunk() -> Result<()> {
        let (_dir, _repo, _ctx) = fixture()?;
        let sink = Arc::new(MemorySink::new());
        run(sink.clone(), None).await?;

        assert!(sink.events().iter().any(|event| matches!(
            event,
            Event::Notice { message } if message.contains("'main'")
        )));
        Ok(())
    }
}
