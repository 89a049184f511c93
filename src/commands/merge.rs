//! `sta merge`: plan and execute a stacked merge.

use std::sync::Arc;

use anyhow::Result;

use crate::context::ExecutionContext;
use crate::engine::MergeStrategy;
use crate::events::{Event, EventSink};
use crate::forge::MergeMethod;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    sink: Arc<dyn EventSink>,
    target: Option<String>,
    strategy: MergeStrategy,
    method: MergeMethod,
    scope: Option<String>,
    force: bool,
) -> Result<()> {
    let mut engine = super::load_engine_with_host(sink.clone()).await?;
    let _lock = super::lock_operations(&engine)?;

    let plan = engine
        .plan_merge(target.as_deref(), strategy, scope.as_deref())
        .await?;

    // Narrate the plan before touching anything
    for info in &plan.validation.infos {
        sink.emit(&Event::Notice { message: info.clone() });
    }
    for warning in &plan.validation.warnings {
        sink.emit(&Event::Warning {
            message: warning.clone(),
        });
    }
    for error in &plan.validation.errors {
        sink.emit(&Event::Warning {
            message: format!("blocking: {}", error),
        });
    }

    if ExecutionContext::is_dry_run() {
        let total = plan.steps.len();
        for (index, step) in plan.steps.iter().enumerate() {
            sink.emit(&Event::PlanStep {
                index,
                total,
                description: step.description.clone(),
            });
        }
        sink.emit(&Event::Notice {
            message: format!("dry run; no changes made (plan {})", &plan.digest[..12]),
        });
        return Ok(());
    }

    engine.execute_merge_plan(&plan, method, force).await?;
    sink.emit(&Event::Notice {
        message: format!("merge complete ({} strategy)", plan.strategy),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::fixture;
    use crate::events::MemorySink;

    #[tokio::test]
    async fn merge_from_trunk_fails() -> Result<()> {
        let (_dir, _repo, _ctx) = fixture()?;
        let err = run(
            Arc::new(MemorySink::new()),
            None,
            MergeStrategy::BottomUp,
            MergeMethod::Squash,
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("trunk"));
        Ok(())
    }
}
