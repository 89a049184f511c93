//! Per-invocation execution flags.
//!
//! `--verbose` and `--dry-run` are global flags that would otherwise thread
//! through every function signature. They are stored task-locally for async
//! code (preserved across `.await` points) with a thread-local fallback for
//! synchronous paths.

use std::cell::Cell;
use std::future::Future;

#[derive(Clone, Copy, Default)]
pub struct ExecutionContext {
    pub verbose: bool,
    pub dry_run: bool,
}

thread_local! {
    static FALLBACK: Cell<ExecutionContext> = const { Cell::new(ExecutionContext { verbose: false, dry_run: false }) };
}

tokio::task_local! {
    static CURRENT: ExecutionContext;
}

impl ExecutionContext {
    pub fn new(verbose: bool, dry_run: bool) -> Self {
        Self { verbose, dry_run }
    }

    /// Set the thread-local fallback used by synchronous code paths.
    pub fn install(self) {
        FALLBACK.with(|ctx| ctx.set(self));
    }

    fn get() -> ExecutionContext {
        CURRENT
            .try_with(|ctx| *ctx)
            .unwrap_or_else(|_| FALLBACK.with(Cell::get))
    }

    pub fn is_verbose() -> bool {
        Self::get().verbose
    }

    pub fn is_dry_run() -> bool {
        Self::get().dry_run
    }
}

/// Run a future with the given context scoped to it, surviving task
/// migrations between worker threads.
pub async fn with_context<F: Future>(ctx: ExecutionContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}
