//! In-process backend reading the object database via libgit2.
//!
//! `git2::Repository` is not `Sync`; one mutex serializes all access so the
//! backend can be shared across batch-read tasks. Subprocess-based reads do
//! not take this lock.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::{CommitInfo, GitBackend, Oid, RefFormat};

pub struct Git2Backend {
    repo: Mutex<git2::Repository>,
    git_dir: PathBuf,
    workdir: PathBuf,
}

impl Git2Backend {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(path).context("not a git repository")?;
        let git_dir = repo.path().to_path_buf();
        let workdir = repo
            .workdir()
            .context("bare repositories are not supported")?
            .to_path_buf();
        Ok(Self {
            repo: Mutex::new(repo),
            git_dir,
            workdir,
        })
    }

    fn with_repo<T>(&self, f: impl FnOnce(&git2::Repository) -> Result<T>) -> Result<T> {
        let repo = self.repo.lock().expect("git2 repository lock poisoned");
        f(&repo)
    }
}

fn resolve_to_commit_id(repo: &git2::Repository, refspec: &str) -> Result<git2::Oid> {
    let obj = repo
        .revparse_single(refspec)
        .with_context(|| format!("cannot resolve '{}'", refspec))?;
    match obj.peel(git2::ObjectType::Commit) {
        Ok(commit) => Ok(commit.id()),
        Err(_) => Ok(obj.id()),
    }
}

impl GitBackend for Git2Backend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        RefFormat::Files
    }

    fn current_branch(&self) -> Result<Option<String>> {
        self.with_repo(|repo| {
            if repo.head_detached().unwrap_or(false) {
                return Ok(None);
            }
            let head = repo.head().context("failed to read HEAD")?;
            Ok(head.shorthand().map(str::to_string))
        })
    }

    fn local_branches(&self) -> Result<Vec<(String, Oid)>> {
        self.with_repo(|repo| {
            let mut out = Vec::new();
            for entry in repo.branches(Some(git2::BranchType::Local))? {
                let (branch, _) = entry?;
                let name = match branch.name()? {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if let Some(target) = branch.get().target() {
                    out.push((name, Oid::from(target)));
                }
            }
            out.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(out)
        })
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        self.with_repo(|repo| Ok(repo.find_branch(name, git2::BranchType::Local).is_ok()))
    }

    fn resolve_commit(&self, refspec: &str) -> Result<Oid> {
        self.with_repo(|repo| resolve_to_commit_id(repo, refspec).map(Oid::from))
    }

    fn commits_between(&self, base: &str, head: &str) -> Result<Vec<Oid>> {
        self.with_repo(|repo| {
            let base_id = resolve_to_commit_id(repo, base)?;
            let head_id = resolve_to_commit_id(repo, head)?;

            let mut walk = repo.revwalk()?;
            walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;
            walk.push(head_id)?;
            walk.hide(base_id)?;

            let mut out = Vec::new();
            for id in walk {
                out.push(Oid::from(id?));
            }
            Ok(out)
        })
    }

    fn commit_info(&self, refspec: &str) -> Result<CommitInfo> {
        self.with_repo(|repo| {
            let id = resolve_to_commit_id(repo, refspec)?;
            let commit = repo.find_commit(id)?;
            let author = commit.author();
            let message = commit.message().unwrap_or_default();
            let (subject, body) = match message.split_once('\n') {
                Some((subject, rest)) => (subject.to_string(), rest.trim_start_matches('\n').to_string()),
                None => (message.to_string(), String::new()),
            };
            Ok(CommitInfo {
                id: Oid::from(id),
                author_name: author.name().unwrap_or_default().to_string(),
                author_email: author.email().unwrap_or_default().to_string(),
                time: commit.time().seconds(),
                subject,
                body,
            })
        })
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        self.with_repo(|repo| {
            let a = resolve_to_commit_id(repo, a)?;
            let b = resolve_to_commit_id(repo, b)?;
            let base = repo
                .merge_base(a, b)
                .with_context(|| format!("no merge base between {} and {}", a, b))?;
            Ok(Oid::from(base))
        })
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.with_repo(|repo| {
            let ancestor = resolve_to_commit_id(repo, ancestor)?;
            let descendant = resolve_to_commit_id(repo, descendant)?;
            if ancestor == descendant {
                return Ok(true);
            }
            Ok(repo.graph_descendant_of(descendant, ancestor)?)
        })
    }

    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        self.with_repo(|repo| {
            let base_tree = repo.find_commit(resolve_to_commit_id(repo, base)?)?.tree()?;
            let head_tree = repo.find_commit(resolve_to_commit_id(repo, head)?)?.tree()?;
            let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), None)?;

            let mut files = Vec::new();
            for delta in diff.deltas() {
                if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                    files.push(path.to_string_lossy().into_owned());
                }
            }
            files.sort();
            files.dedup();
            Ok(files)
        })
    }

    fn create_reference(&self, name: &str, target: &Oid, force: bool, log_message: &str) -> Result<()> {
        self.with_repo(|repo| {
            repo.reference(name, target.to_git2()?, force, log_message)
                .with_context(|| format!("failed to update ref {}", name))?;
            Ok(())
        })
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        self.with_repo(|repo| {
            match repo.find_reference(name) {
                Ok(mut reference) => reference
                    .delete()
                    .with_context(|| format!("failed to delete ref {}", name)),
                // Absent ref: nothing to do
                Err(_) => Ok(()),
            }
        })
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        self.with_repo(|repo| match repo.find_reference(name) {
            Ok(reference) => Ok(reference.target().map(Oid::from)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read ref {}", name)),
        })
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        self.with_repo(|repo| {
            let mut out = Vec::new();
            for entry in repo.references_glob(pattern)? {
                let reference = entry?;
                if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
                    out.push((name.to_string(), Oid::from(target)));
                }
            }
            out.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(out)
        })
    }

    fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        self.with_repo(|repo| Ok(Oid::from(repo.blob(content)?)))
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.with_repo(|repo| {
            let blob = repo
                .find_blob(oid.to_git2()?)
                .with_context(|| format!("blob {} not found", oid))?;
            Ok(blob.content().to_vec())
        })
    }
}
