//! `sta sync`: pull trunk, refresh PRs, clean landed branches, restack.

use std::sync::Arc;

use anyhow::Result;

use crate::engine::SyncOptions;
use crate::events::{Event, EventSink};

pub async fn run(sink: Arc<dyn EventSink>, force: bool, no_cleanup: bool, no_restack: bool) -> Result<()> {
    let mut engine = super::load_engine_with_host(sink.clone()).await?;
    let _lock = super::lock_operations(&engine)?;

    let options = SyncOptions {
        force,
        no_cleanup,
        restack: !no_restack,
    };
    let report = engine.sync(&options).await?;

    if !report.refresh_failures.is_empty() {
        sink.emit(&Event::Warning {
            message: format!(
                "{} branch(es) could not refresh PR state; they were left untouched",
                report.refresh_failures.len()
            ),
        });
    }
    if let Some(outcome) = report.restack {
        super::into_conflict_error(outcome)?;
    }
    sink.emit(&Event::Notice {
        message: format!(
            "sync complete ({} cleaned, {} PR(s) refreshed)",
            report.cleaned.len(),
            report.refreshed.len()
        ),
    });
    Ok(())
}
