//! Actions: thin orchestrators from CLI intents to engine operations.
//!
//! An action acquires the engine (and the operation lock when it mutates),
//! validates preconditions, calls engine operations, and lets the event
//! sink narrate. Actions never run git directly.

pub mod abort;
pub mod completion;
pub mod continue_op;
pub mod create;
pub mod foreach;
pub mod init;
pub mod merge;
pub mod move_cmd;
pub mod reorder;
pub mod restack;
pub mod submit;
pub mod sync;
pub mod track;
pub mod trunk_cmd;
pub mod untrack;

use std::sync::Arc;

use anyhow::Result;

use crate::engine::{Engine, RestackOutcome};
use crate::errors::StackError;
use crate::events::EventSink;
use crate::git_gateway::GitGateway;
use crate::state::OperationLock;

/// Load an engine without a host (purely local commands).
pub(crate) async fn load_engine(sink: Arc<dyn EventSink>) -> Result<Engine> {
    Engine::load(sink).await
}

/// Load an engine with the host attached when a usable remote exists.
/// Local-only repositories simply run without PR features.
pub(crate) async fn load_engine_with_host(sink: Arc<dyn EventSink>) -> Result<Engine> {
    let gateway = GitGateway::open()?;
    let host = crate::forge::host_for_remote(&gateway).ok();
    Engine::load_with_host(sink, host).await
}

/// Take the repository-wide operation lock for a mutating action.
pub(crate) fn lock_operations(engine: &Engine) -> Result<OperationLock> {
    OperationLock::acquire(engine.gateway().git_dir())
}

/// A conflicted restack surfaces as the `Conflict` error category (exit
/// code 2); the rebase stays in progress for `continue`/`abort`.
pub(crate) fn into_conflict_error(outcome: RestackOutcome) -> Result<RestackOutcome> {
    match outcome {
        RestackOutcome::Conflict { branch } => Err(StackError::Conflict { branch }.into()),
        completed => Ok(completed),
    }
}
