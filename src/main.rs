use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use clap_complete::Shell;

mod commands;
mod config;
mod context;
mod engine;
mod errors;
mod events;
mod forge;
mod git_backend;
mod git_gateway;
mod metadata;
mod program_name;
mod state;
#[cfg(test)]
mod test_context;

use engine::MergeStrategy;
use forge::MergeMethod;

#[derive(Parser)]
#[command(
    about = "strata: stacks of dependent git branches",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Show git commands being executed
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Preview without executing
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the trunk branch for this repository
    Init {
        /// Trunk branch (inferred when omitted)
        #[arg(long)]
        trunk: Option<String>,
    },
    /// Create a branch at HEAD, tracked on the current branch
    Create {
        name: String,
        /// Stage all changes (including untracked files) before committing
        #[arg(short = 'a', long)]
        all: bool,
        /// Commit staged changes onto the new branch with this message
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Start tracking a branch under a parent
    Track {
        /// Branch to track (defaults to the current branch)
        branch: Option<String>,
        /// Parent branch (defaults to the trunk)
        #[arg(long)]
        parent: Option<String>,
        /// Tag the branch with a scope for bulk operations
        #[arg(long)]
        scope: Option<String>,
    },
    /// Stop tracking a branch (the git branch is kept)
    Untrack {
        /// Branch to untrack (defaults to the current branch)
        branch: Option<String>,
    },
    /// Rebase branches onto their parents' current tips
    Restack {
        /// Branch to start from (defaults to the current branch)
        branch: Option<String>,
        /// Restack only this branch
        #[arg(long, conflicts_with_all = ["downstack", "all"])]
        only: bool,
        /// Restack ancestors down to the trunk instead of descendants
        #[arg(long, conflicts_with = "all")]
        downstack: bool,
        /// Restack every tracked branch
        #[arg(long)]
        all: bool,
    },
    /// Move a branch (and its descendants) onto a new parent
    Move {
        /// New parent branch
        #[arg(long)]
        onto: String,
        /// Branch to move (defaults to the current branch)
        #[arg(long)]
        source: Option<String>,
    },
    /// Rearrange the chain from trunk to the current branch
    Reorder {
        /// Read the new order from a file instead of $EDITOR
        #[arg(long)]
        file: Option<String>,
    },
    /// Pull trunk, refresh PRs, clean landed branches, restack
    Sync {
        /// Hard-reset a diverged trunk to its remote
        #[arg(long)]
        force: bool,
        /// Skip deleting merged/closed branches
        #[arg(long)]
        no_cleanup: bool,
        /// Skip the restack phase
        #[arg(long)]
        no_restack: bool,
    },
    /// Push the current stack and create or update its PRs
    Submit {
        /// Open new PRs as drafts
        #[arg(long)]
        draft: bool,
        /// Request reviews from these users
        #[arg(long)]
        reviewer: Vec<String>,
    },
    /// Plan and execute a stacked merge
    Merge {
        /// Branch whose stack to merge (defaults to the current branch)
        branch: Option<String>,
        /// bottom-up, top-down, or consolidate
        #[arg(long, default_value = "bottom-up")]
        strategy: MergeStrategy,
        /// squash, merge, or rebase
        #[arg(long, default_value = "squash")]
        method: MergeMethod,
        /// Merge the branches carrying this scope tag instead
        #[arg(long, conflicts_with = "branch")]
        scope: Option<String>,
        /// Proceed despite validation errors
        #[arg(long)]
        force: bool,
    },
    /// Run a shell command on each branch in scope
    Foreach {
        /// Walk ancestors instead of descendants
        #[arg(long, conflicts_with = "current_only")]
        downstack: bool,
        /// Run only on the current branch
        #[arg(long)]
        current_only: bool,
        /// Keep going past failures instead of stopping at the first
        #[arg(long)]
        keep_going: bool,
        /// Command to run (passed to `sh -c`)
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Resume the interrupted operation after resolving conflicts
    Continue,
    /// Abort the interrupted operation
    Abort,
    /// Show or set the trunk branch
    Trunk {
        /// Set the trunk to this branch
        #[arg(long)]
        set: Option<String>,
    },
    /// Generate shell completions
    Completion { shell: Shell },
}

fn install_signal_handler() {
    ctrlc::set_handler(|| {
        // Checkpointed state survives; the user picks up with continue/abort
        eprintln!("\nInterrupted. Run:");
        eprintln!("  {} continue   to resume", program_name::program_name());
        eprintln!("  {} abort      to roll back", program_name::program_name());
        std::process::exit(130);
    })
    .expect("failed to install signal handler");
}

#[tokio::main]
async fn main() {
    install_signal_handler();

    let matches = Cli::command().name(program_name::program_name()).get_matches();
    let cli = Cli::from_arg_matches(&matches).expect("argument parsing");

    context::ExecutionContext::new(cli.verbose, cli.dry_run).install();
    let ctx = context::ExecutionContext::new(cli.verbose, cli.dry_run);

    let Some(command) = cli.command else {
        eprintln!(
            "No command provided. Run '{} --help' for usage.",
            program_name::program_name()
        );
        std::process::exit(1);
    };

    let sink: Arc<dyn events::EventSink> = Arc::new(events::ConsoleSink::new());

    let result = context::with_context(ctx, async {
        match command {
            Commands::Init { trunk } => commands::init::run(sink.clone(), trunk).await,
            Commands::Create { name, all, message } => {
                commands::create::run(sink.clone(), name, all, message).await
            }
            Commands::Track { branch, parent, scope } => {
                commands::track::run(sink.clone(), branch, parent, scope).await
            }
            Commands::Untrack { branch } => commands::untrack::run(sink.clone(), branch).await,
            Commands::Restack {
                branch,
                only,
                downstack,
                all,
            } => {
                let scope = if all {
                    commands::restack::RestackScope::All
                } else if only {
                    commands::restack::RestackScope::Only
                } else if downstack {
                    commands::restack::RestackScope::Downstack
                } else {
                    commands::restack::RestackScope::Upstack
                };
                commands::restack::run(sink.clone(), branch, scope).await
            }
            Commands::Move { onto, source } => commands::move_cmd::run(sink.clone(), onto, source).await,
            Commands::Reorder { file } => commands::reorder::run(sink.clone(), file).await,
            Commands::Sync {
                force,
                no_cleanup,
                no_restack,
            } => commands::sync::run(sink.clone(), force, no_cleanup, no_restack).await,
            Commands::Submit { draft, reviewer } => commands::submit::run(sink.clone(), draft, reviewer).await,
            Commands::Merge {
                branch,
                strategy,
                method,
                scope,
                force,
            } => commands::merge::run(sink.clone(), branch, strategy, method, scope, force).await,
            Commands::Foreach {
                downstack,
                current_only,
                keep_going,
                command,
            } => commands::foreach::run(sink.clone(), command, downstack, current_only, keep_going).await,
            Commands::Continue => commands::continue_op::run(sink.clone()).await,
            Commands::Abort => commands::abort::run(sink.clone()).await,
            Commands::Trunk { set } => commands::trunk_cmd::run(sink.clone(), set).await,
            Commands::Completion { shell } => {
                commands::completion::run(shell);
                Ok(())
            }
        }
    })
    .await;

    if let Err(err) = result {
        eprintln!("Error: {:#}", err);
        std::process::exit(errors::exit_code(&err));
    }
}
