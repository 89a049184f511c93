//! Structured progress events.
//!
//! Actions report what the engine did through an `EventSink` instead of
//! printing directly; the CLI installs `ConsoleSink`, tests install
//! `MemorySink` and assert on the captured stream.

use std::sync::Mutex;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::PullResult;
use crate::metadata::PrState;

/// Why sync removed a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanReason {
    PrMerged,
    PrClosed,
    CommitsUpstream,
}

impl std::fmt::Display for CleanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanReason::PrMerged => write!(f, "PR merged"),
            CleanReason::PrClosed => write!(f, "PR closed"),
            CleanReason::CommitsUpstream => write!(f, "all commits in trunk"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    // sync
    FetchStarted { remote: String },
    TrunkPulled { trunk: String, result: PullResult },
    PrRefreshed { branch: String, number: u64, state: PrState },
    PrRefreshFailed { branch: String, error: String },
    BaseChanged { branch: String, remote_base: String },
    BranchCleaned { branch: String, reason: CleanReason },
    ChildRewired { child: String, new_parent: String },

    // restack
    RestackStarted { total: usize },
    BranchRestacked { branch: String, onto: String },
    BranchUpToDate { branch: String },
    RestackConflict { branch: String, onto: String },
    RestackFinished { rebased: usize, up_to_date: usize },

    // graph maintenance
    BranchTracked { branch: String, parent: String },
    BranchUntracked { branch: String },
    BranchMoved { branch: String, onto: String },
    BranchDemoted { branch: String, reason: String },

    // foreach
    ForeachRunning { branch: String },
    ForeachExited { branch: String, code: i32 },

    // submit / merge
    BranchPushed { branch: String },
    PrCreated { branch: String, number: u64, url: String },
    PrUpdated { branch: String, number: u64 },
    PlanStep { index: usize, total: usize, description: String },

    Notice { message: String },
    Warning { message: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Console rendering of the event stream. Long restacks get a progress bar;
/// everything else is line-oriented.
#[derive(Default)]
pub struct ConsoleSink {
    bar: Mutex<Option<ProgressBar>>,
}

/// Progress bar only pays off past this many branches.
const PROGRESS_BAR_THRESHOLD: usize = 8;

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(bar) = self.bar.lock().unwrap().as_ref() {
            f(bar);
        }
    }

    fn println(&self, line: String) {
        match self.bar.lock().unwrap().as_ref() {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::FetchStarted { remote } => {
                self.println(format!("{} Fetching from {}...", "→".blue(), remote));
            }
            Event::TrunkPulled { trunk, result } => match result {
                PullResult::Done => self.println(format!("{} {} updated", "✓".green(), trunk.green())),
                PullResult::Unneeded => self.println(format!("{} {} is up to date", "✓".green(), trunk)),
                PullResult::Conflict => self.println(format!(
                    "{} {} has diverged from its remote (use --force to reset)",
                    "!".yellow().bold(),
                    trunk
                )),
            },
            Event::PrRefreshed { branch, number, state } => {
                self.println(format!("  {} {} → PR #{} ({})", "✓".green(), branch, number, state));
            }
            Event::PrRefreshFailed { branch, error } => {
                self.println(format!("  {} {}: {}", "!".yellow(), branch.yellow(), error));
            }
            Event::BaseChanged { branch, remote_base } => {
                self.println(format!(
                    "  {} {} base moved to {} on the remote",
                    "→".blue(),
                    branch,
                    remote_base.blue()
                ));
            }
            Event::BranchCleaned { branch, reason } => {
                self.println(format!("  {} Deleted {} ({})", "✓".green(), branch.yellow(), reason));
            }
            Event::ChildRewired { child, new_parent } => {
                self.println(format!("  {} {} now on {}", "→".blue(), child, new_parent.blue()));
            }
            Event::RestackStarted { total } => {
                if *total >= PROGRESS_BAR_THRESHOLD {
                    let bar = ProgressBar::new(*total as u64);
                    bar.set_style(
                        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                            .expect("static template")
                            .progress_chars("=> "),
                    );
                    bar.set_message("Restacking");
                    *self.bar.lock().unwrap() = Some(bar);
                } else {
                    self.println(format!("{} Restacking {} branches", "→".blue(), total));
                }
            }
            Event::BranchRestacked { branch, onto } => {
                self.println(format!("  {} Restacked {} on {}", "✓".green(), branch.green(), onto.blue()));
                self.with_bar(|bar| bar.inc(1));
            }
            Event::BranchUpToDate { branch } => {
                self.println(format!("  {} {} already up to date", "✓".green(), branch));
                self.with_bar(|bar| bar.inc(1));
            }
            Event::RestackConflict { branch, onto } => {
                self.with_bar(|bar| bar.abandon());
                *self.bar.lock().unwrap() = None;
                println!();
                println!(
                    "{} Conflicts while restacking {} on {}",
                    "✗".red().bold(),
                    branch.yellow(),
                    onto.blue()
                );
                println!("Resolve the conflicts, then run:");
                println!("  {} continue", crate::program_name::program_name());
                println!("  {} abort", crate::program_name::program_name());
            }
            Event::RestackFinished { rebased, up_to_date } => {
                if let Some(bar) = self.bar.lock().unwrap().take() {
                    bar.finish_and_clear();
                }
                if *rebased > 0 {
                    println!(
                        "{} Restack complete ({} rebased, {} already in place)",
                        "✓".green().bold(),
                        rebased,
                        up_to_date
                    );
                } else {
                    println!("{} Nothing to restack", "✓".green().bold());
                }
            }
            Event::BranchTracked { branch, parent } => {
                self.println(format!("{} Tracking {} on {}", "✓".green(), branch.green(), parent.blue()));
            }
            Event::BranchUntracked { branch } => {
                self.println(format!("{} Untracked {}", "✓".green(), branch));
            }
            Event::BranchMoved { branch, onto } => {
                self.println(format!("{} Moved {} onto {}", "✓".green(), branch.green(), onto.blue()));
            }
            Event::BranchDemoted { branch, reason } => {
                self.println(format!("{} {} untracked: {}", "!".yellow().bold(), branch.yellow(), reason));
            }
            Event::ForeachRunning { branch } => {
                self.println(format!("{} running on {}", "→".blue(), branch.green()));
            }
            Event::ForeachExited { branch, code } => {
                if *code == 0 {
                    self.println(format!("  {} {} exited 0", "✓".green(), branch));
                } else {
                    self.println(format!("  {} {} exited {}", "✗".red(), branch.yellow(), code));
                }
            }
            Event::BranchPushed { branch } => {
                self.println(format!("  {} Pushed {}", "✓".green(), branch.green()));
            }
            Event::PrCreated { branch, number, url } => {
                self.println(format!("  {} PR #{} for {}: {}", "✓".green(), number, branch.green(), url));
            }
            Event::PrUpdated { branch, number } => {
                self.println(format!("  {} Updated PR #{} for {}", "✓".green(), number, branch));
            }
            Event::PlanStep { index, total, description } => {
                self.println(format!("{} [{}/{}] {}", "→".blue(), index + 1, total, description));
            }
            Event::Notice { message } => self.println(format!("{} {}", "→".blue(), message)),
            Event::Warning { message } => self.println(format!("{} {}", "!".yellow().bold(), message)),
        }
    }
}

/// Captures events for assertions.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
