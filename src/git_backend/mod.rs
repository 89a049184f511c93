//! Read-side git backend abstraction.
//!
//! Immutable queries (ref resolution, commit walks, merge-base, blob and ref
//! I/O) go through a `GitBackend`. Two implementations exist:
//!
//! - `Git2Backend` reads the object database in-process via libgit2. The
//!   repository handle is not thread-safe, so it is serialized behind one
//!   mutex; concurrent batch reads contend on that lock and nothing else.
//! - `SubprocessBackend` shells out to the git CLI. It works on any ref
//!   format, including reftable repositories libgit2 cannot open.
//!
//! Mutating operations (rebase, checkout, push, ...) never go through the
//! backend; the gateway always invokes the git binary for those.

mod git2_backend;
mod subprocess_backend;

pub use git2_backend::Git2Backend;
pub use subprocess_backend::SubprocessBackend;

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Git ref storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFormat {
    /// Loose refs + packed-refs
    Files,
    /// Binary reftable format (git 2.45+)
    Reftable,
}

/// Git object id as a 40-character hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(String);

impl Oid {
    /// Parse and validate a hex object id.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("invalid object id: '{}'", s);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Wrap trusted output (e.g. from git itself) without validation.
    pub(crate) fn from_trusted(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }

    pub fn to_git2(&self) -> Result<git2::Oid> {
        git2::Oid::from_str(&self.0).context("failed to parse object id")
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<git2::Oid> for Oid {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Author, date and message of a commit.
#[derive(Debug, Clone)]
#[allow(dead_code)] // full record; callers pick the fields they need
pub struct CommitInfo {
    pub id: Oid,
    pub author_name: String,
    pub author_email: String,
    /// Seconds since the epoch.
    pub time: i64,
    pub subject: String,
    pub body: String,
}

/// Read-only query surface plus the low-level ref/blob primitives the
/// metadata store is built on.
pub trait GitBackend: Send + Sync {
    fn git_dir(&self) -> &Path;
    fn workdir(&self) -> &Path;
    fn ref_format(&self) -> RefFormat;

    /// Current branch name, `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>>;

    /// Local branch names with their tip revisions.
    fn local_branches(&self) -> Result<Vec<(String, Oid)>>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Resolve any reference expression (branch, `origin/x`, tag, sha,
    /// `<rev>~N`, ...) to a commit id.
    fn resolve_commit(&self, refspec: &str) -> Result<Oid>;

    /// Commits in `(base, head]`, newest first.
    fn commits_between(&self, base: &str, head: &str) -> Result<Vec<Oid>>;

    fn commit_info(&self, refspec: &str) -> Result<CommitInfo>;

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid>;

    /// True when `ancestor` is reachable from `descendant` (or equal).
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Paths touched between two revisions.
    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>>;

    // Ref primitives (used for refs/strata/*)

    fn create_reference(&self, name: &str, target: &Oid, force: bool, log_message: &str) -> Result<()>;

    /// Idempotent: deleting an absent ref succeeds.
    fn delete_reference(&self, name: &str) -> Result<()>;

    fn find_reference(&self, name: &str) -> Result<Option<Oid>>;

    /// References matching a glob pattern, as (full ref name, target) pairs.
    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>>;

    // Blob primitives

    fn create_blob(&self, content: &[u8]) -> Result<Oid>;

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>>;
}

/// Detect the ref format of the repository at `path`.
pub fn detect_ref_format(path: &Path) -> Result<RefFormat> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-ref-format"])
        .current_dir(path)
        .output()
        .context("failed to detect ref format")?;

    if !output.status.success() {
        // Older git that predates the flag - files format
        return Ok(RefFormat::Files);
    }

    match String::from_utf8_lossy(&output.stdout).trim() {
        "reftable" => Ok(RefFormat::Reftable),
        _ => Ok(RefFormat::Files),
    }
}

/// Open the appropriate backend for the repository at `path`.
pub fn open_backend(path: &Path) -> Result<Box<dyn GitBackend>> {
    match detect_ref_format(path)? {
        RefFormat::Reftable => Ok(Box::new(SubprocessBackend::open(path)?)),
        RefFormat::Files => match Git2Backend::open(path) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(_) => Ok(Box::new(SubprocessBackend::open(path)?)),
        },
    }
}
