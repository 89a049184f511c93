//! `sta foreach`: run a shell command on every branch in scope.

use std::sync::Arc;

use anyhow::Result;

use crate::engine::StackRange;
use crate::errors::StackError;
use crate::events::EventSink;

pub async fn run(
    sink: Arc<dyn EventSink>,
    command: Vec<String>,
    downstack: bool,
    current_only: bool,
    keep_going: bool,
) -> Result<()> {
    let mut engine = super::load_engine(sink).await?;
    let _lock = super::lock_operations(&engine)?;

    let range = if current_only {
        StackRange::CURRENT_ONLY
    } else if downstack {
        StackRange::DOWNSTACK
    } else {
        StackRange::UPSTACK
    };

    let command = command.join(" ");
    let report = engine.foreach(range, &command, !keep_going)?;

    if !report.all_succeeded() {
        let failures: Vec<String> = report
            .results
            .iter()
            .filter(|(_, code)| *code != 0)
            .map(|(branch, code)| format!("{} (exit {})", branch, code))
            .collect();
        return Err(StackError::User(format!("command failed on: {}", failures.join(", "))).into());
    }
    Ok(())
}
