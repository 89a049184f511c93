//! Gateway to the local git repository.
//!
//! One `GitGateway` per engine. Immutable queries delegate to the
//! `GitBackend` (in-process object-database reads where possible); mutating
//! operations always invoke the git binary and capture its output. All
//! commands run in the gateway's working directory, which tests point at
//! fixture repositories.

mod backup;
mod branch;
mod commit;
pub(crate) mod exec;
mod rebase;
mod remote;
mod status;
mod worktree;

pub use backup::BackupRef;
pub use commit::CommitMode;
pub use rebase::RebaseAttempt;
pub use worktree::WorktreeInfo;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::git_backend::{self, CommitInfo, GitBackend, Oid, RefFormat};

pub struct GitGateway {
    backend: Box<dyn GitBackend>,
    git_dir: PathBuf,
    workdir: PathBuf,
    remote: String,
}

impl GitGateway {
    /// Open the repository containing the current directory.
    ///
    /// In test builds the thread-local fixture path takes precedence; a test
    /// that forgets to set one would otherwise mutate the developer checkout,
    /// so that is a hard failure.
    pub fn open() -> Result<Self> {
        #[cfg(test)]
        {
            match crate::test_context::fixture_repo_path() {
                Some(path) => Self::from_path(&path),
                None => panic!(
                    "GitGateway::open() called in a test without a FixtureContext.\n\
                     Wrap the test body:\n\
                       let dir = tempdir()?;\n\
                       let _repo = init_fixture_repo(dir.path())?;\n\
                       let _ctx = FixtureContext::new(dir.path());"
                ),
            }
        }

        #[cfg(not(test))]
        {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            Self::from_path(&cwd)
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let backend = git_backend::open_backend(path.as_ref())
            .context("not a git repository (run from inside a repository)")?;
        let git_dir = backend.git_dir().to_path_buf();
        let workdir = backend.workdir().to_path_buf();
        Ok(Self {
            backend,
            git_dir,
            workdir,
            remote: "origin".to_string(),
        })
    }

    /// Use a different remote for push/fetch/ls-remote.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    #[allow(dead_code)]
    pub fn ref_format(&self) -> RefFormat {
        self.backend.ref_format()
    }

    pub(crate) fn backend(&self) -> &dyn GitBackend {
        self.backend.as_ref()
    }

    // ── read-only queries (delegated) ───────────────────────────────

    /// Resolve any reference expression to a commit id.
    pub fn resolve(&self, refspec: &str) -> Result<Oid> {
        self.backend.resolve_commit(refspec)
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        self.backend.branch_exists(name)
    }

    /// Local branches with tips, sorted by name.
    pub fn local_branches(&self) -> Result<Vec<(String, Oid)>> {
        self.backend.local_branches()
    }

    /// Commits in `(base, head]`, newest first.
    #[allow(dead_code)]
    pub fn commits_between(&self, base: &str, head: &str) -> Result<Vec<Oid>> {
        self.backend.commits_between(base, head)
    }

    pub fn commit_info(&self, refspec: &str) -> Result<CommitInfo> {
        self.backend.commit_info(refspec)
    }

    pub fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        self.backend.merge_base(a, b)
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.backend.is_ancestor(ancestor, descendant)
    }

    #[allow(dead_code)]
    pub fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        self.backend.changed_files(base, head)
    }

    /// Force-move a branch ref without touching the worktree.
    pub fn force_branch_ref(&self, branch: &str, target: &Oid) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);
        exec::run_git_checked(&self.workdir, &["update-ref", &refname, target.as_str()])
            .with_context(|| format!("failed to move branch '{}'", branch))?;
        Ok(())
    }

    /// True when a remote with the configured name exists.
    pub fn has_remote(&self) -> Result<bool> {
        let output = exec::run_git(&self.workdir, &["remote", "get-url", &self.remote])?;
        Ok(output.success())
    }

    /// URL of the configured remote.
    pub fn remote_url(&self) -> Result<String> {
        Ok(exec::run_git_stdout(&self.workdir, &["remote", "get-url", &self.remote])
            .with_context(|| format!("remote '{}' is not configured", self.remote))?)
    }
}
