//! Thread-local fixture repository for parallel unit tests.
//!
//! Tests must never operate on the developer's checkout. Instead of changing
//! the process working directory (which would force serial execution), each
//! test sets a thread-local repository path that `GitGateway::open()` and
//! friends consult in test builds.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Result;

thread_local! {
    static FIXTURE_REPO: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// RAII guard routing repository discovery at the given path for the current
/// thread. Cleared on drop, including on panic. `!Send` so it cannot leak
/// across threads.
pub struct FixtureContext {
    _not_send: PhantomData<*const ()>,
}

impl FixtureContext {
    pub fn new(path: &Path) -> Self {
        FIXTURE_REPO.with(|p| *p.borrow_mut() = Some(path.to_path_buf()));
        Self { _not_send: PhantomData }
    }
}

impl Drop for FixtureContext {
    fn drop(&mut self) {
        FIXTURE_REPO.with(|p| *p.borrow_mut() = None);
    }
}

/// The fixture path for this thread, if a `FixtureContext` is active.
pub(crate) fn fixture_repo_path() -> Option<PathBuf> {
    FIXTURE_REPO.with(|p| p.borrow().clone())
}

/// Initialize a fixture repository with one commit on `main`.
///
/// Normalizes the default branch name so tests behave the same regardless of
/// the host's `init.defaultBranch`.
pub fn init_fixture_repo(path: &Path) -> Result<git2::Repository> {
    let repo = git2::Repository::init(path)?;

    let mut config = repo.config()?;
    config.set_str("user.name", "Fixture User")?;
    config.set_str("user.email", "fixture@example.com")?;
    drop(config);

    let sig = git2::Signature::now("Fixture User", "fixture@example.com")?;
    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])?;
    drop(tree);

    {
        let mut branch = repo
            .find_branch("master", git2::BranchType::Local)
            .or_else(|_| repo.find_branch("main", git2::BranchType::Local))?;
        if branch.name()?.unwrap_or("") == "master" {
            branch.rename("main", false)?;
        }
    }

    std::fs::create_dir_all(path.join(".git").join("strata"))?;

    Ok(repo)
}

/// Add a commit touching `file` on the currently checked-out branch and
/// return its id. Fixture helper shared by engine tests.
pub fn commit_file(repo: &git2::Repository, file: &str, contents: &str, message: &str) -> Result<git2::Oid> {
    let workdir = repo.workdir().expect("fixture repo has a workdir");
    std::fs::write(workdir.join(file), contents)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let sig = git2::Signature::now("Fixture User", "fixture@example.com")?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
    Ok(oid)
}

/// Create a branch at the current HEAD without switching to it.
pub fn branch_at_head(repo: &git2::Repository, name: &str) -> Result<()> {
    let head = repo.head()?.peel_to_commit()?;
    repo.branch(name, &head, false)?;
    Ok(())
}

/// Check out an existing local branch in the fixture.
pub fn checkout(repo: &git2::Repository, name: &str) -> Result<()> {
    let obj = repo.revparse_single(name)?;
    repo.checkout_tree(&obj, None)?;
    repo.set_head(&format!("refs/heads/{}", name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn context_sets_and_clears_path() {
        let dir = tempdir().unwrap();
        assert!(fixture_repo_path().is_none());
        {
            let _ctx = FixtureContext::new(dir.path());
            assert_eq!(fixture_repo_path(), Some(dir.path().to_path_buf()));
        }
        assert!(fixture_repo_path().is_none());
    }

    #[test]
    fn context_clears_on_panic() {
        let dir = tempdir().unwrap();
        let result = std::panic::catch_unwind(|| {
            let _ctx = FixtureContext::new(dir.path());
            panic!("intentional");
        });
        assert!(result.is_err());
        assert!(fixture_repo_path().is_none());
    }

    #[test]
    fn fixture_repo_lands_on_main() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let head = repo.head()?;
        assert_eq!(head.shorthand(), Some("main"));
        Ok(())
    }

    #[test]
    fn commit_file_advances_head() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let before = repo.head()?.peel_to_commit()?.id();
        commit_file(&repo, "a.txt", "hello", "add a")?;
        let after = repo.head()?.peel_to_commit()?.id();
        assert_ne!(before, after);
        Ok(())
    }
}
