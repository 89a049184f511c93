//! Subprocess backend: every query shells out to the git CLI.
//!
//! Used when libgit2 cannot open the repository (reftable ref format).
//! Slower than `Git2Backend` by one process spawn per call, but format-proof.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use super::{CommitInfo, GitBackend, Oid, RefFormat};

pub struct SubprocessBackend {
    git_dir: PathBuf,
    workdir: PathBuf,
    ref_format: RefFormat,
}

impl SubprocessBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let git_dir_raw = Self::rev_parse(path, "--git-dir")?;
        let git_dir = if Path::new(&git_dir_raw).is_absolute() {
            PathBuf::from(git_dir_raw)
        } else {
            path.join(git_dir_raw)
        };
        let workdir = PathBuf::from(Self::rev_parse(path, "--show-toplevel")?);
        let ref_format = super::detect_ref_format(path)?;
        Ok(Self {
            git_dir,
            workdir,
            ref_format,
        })
    }

    fn rev_parse(path: &Path, flag: &str) -> Result<String> {
        let output = Command::new("git")
            .args(["rev-parse", flag])
            .current_dir(path)
            .output()
            .context("failed to run git rev-parse")?;
        if !output.status.success() {
            anyhow::bail!("not a git repository: {:?}", path);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("failed to run git {}", args.join(" ")))
    }

    fn git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitBackend for SubprocessBackend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        self.ref_format
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let output = self.git(&["symbolic-ref", "--short", "HEAD"])?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    fn local_branches(&self) -> Result<Vec<(String, Oid)>> {
        let stdout = self.git_ok(&["for-each-ref", "--format=%(objectname) %(refname:short)", "refs/heads/"])?;
        let mut out = Vec::new();
        for line in stdout.lines() {
            if let Some((sha, name)) = line.split_once(' ') {
                out.push((name.to_string(), Oid::from_trusted(sha)));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", name);
        let output = self.git(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn resolve_commit(&self, refspec: &str) -> Result<Oid> {
        let spec = format!("{}^{{commit}}", refspec);
        let sha = self
            .git_ok(&["rev-parse", "--verify", &spec])
            .with_context(|| format!("cannot resolve '{}'", refspec))?;
        Ok(Oid::from_trusted(&sha))
    }

    fn commits_between(&self, base: &str, head: &str) -> Result<Vec<Oid>> {
        let range = format!("{}..{}", base, head);
        let stdout = self.git_ok(&["rev-list", "--topo-order", &range])?;
        Ok(stdout.lines().map(Oid::from_trusted).collect())
    }

    fn commit_info(&self, refspec: &str) -> Result<CommitInfo> {
        // %x00-separated to survive newlines in the body
        let stdout = self.git_ok(&["log", "-1", "--format=%H%x00%an%x00%ae%x00%at%x00%s%x00%b", refspec])?;
        let parts: Vec<&str> = stdout.splitn(6, '\0').collect();
        if parts.len() < 5 {
            anyhow::bail!("unexpected git log output for '{}'", refspec);
        }
        Ok(CommitInfo {
            id: Oid::from_trusted(parts[0]),
            author_name: parts[1].to_string(),
            author_email: parts[2].to_string(),
            time: parts[3].trim().parse().unwrap_or(0),
            subject: parts[4].to_string(),
            body: parts.get(5).map(|b| b.trim().to_string()).unwrap_or_default(),
        })
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let sha = self.git_ok(&["merge-base", a, b])?;
        Ok(Oid::from_trusted(&sha))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.git(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        Ok(output.status.success())
    }

    fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let stdout = self.git_ok(&["diff", "--name-only", base, head])?;
        let mut files: Vec<String> = stdout.lines().filter(|l| !l.is_empty()).map(str::to_string).collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn create_reference(&self, name: &str, target: &Oid, force: bool, _log_message: &str) -> Result<()> {
        if !force {
            let output = self.git(&["show-ref", "--verify", "--quiet", name])?;
            if output.status.success() {
                anyhow::bail!("reference '{}' already exists", name);
            }
        }
        self.git_ok(&["update-ref", name, target.as_str()])?;
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        let output = self.git(&["update-ref", "-d", name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Absent refs are fine
            if !stderr.contains("not exist") && !stderr.contains("not found") && !stderr.contains("No such ref") {
                anyhow::bail!("git update-ref -d {} failed: {}", name, stderr.trim());
            }
        }
        Ok(())
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        let output = self.git(&["show-ref", "--verify", name])?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .split_whitespace()
            .next()
            .map(Oid::from_trusted))
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        let output = self.git(&["for-each-ref", "--format=%(objectname) %(refname)", pattern])?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut refs = Vec::new();
        for line in stdout.lines() {
            if let Some((sha, name)) = line.split_once(' ') {
                refs.push((name.to_string(), Oid::from_trusted(sha)));
            }
        }
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }

    fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        let mut child = Command::new("git")
            .args(["hash-object", "-w", "--stdin"])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn git hash-object")?;

        child
            .stdin
            .as_mut()
            .context("no stdin handle")?
            .write_all(content)
            .context("failed to write blob content")?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            anyhow::bail!("git hash-object failed");
        }
        Ok(Oid::from_trusted(&String::from_utf8_lossy(&output.stdout)))
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let output = self.git(&["cat-file", "blob", oid.as_str()])?;
        if !output.status.success() {
            anyhow::bail!("blob {} not found", oid);
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_fixture_repo};
    use tempfile::tempdir;

    #[test]
    fn subprocess_backend_basic_queries() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_fixture_repo(dir.path())?;
        let base = repo.head()?.peel_to_commit()?.id();
        commit_file(&repo, "a.txt", "one", "second")?;

        let backend = SubprocessBackend::open(dir.path())?;
        assert_eq!(backend.current_branch()?, Some("main".to_string()));
        assert!(backend.branch_exists("main")?);
        assert!(!backend.branch_exists("nope")?);
        assert!(backend.is_ancestor(&base.to_string(), "main")?);
        assert_eq!(backend.commits_between(&base.to_string(), "main")?.len(), 1);

        let info = backend.commit_info("main")?;
        assert_eq!(info.subject, "second");
        assert_eq!(info.author_name, "Fixture User");
        Ok(())
    }

    #[test]
    fn subprocess_blob_and_ref_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let _repo = init_fixture_repo(dir.path())?;
        let backend = SubprocessBackend::open(dir.path())?;

        let oid = backend.create_blob(b"payload")?;
        assert_eq!(backend.read_blob(&oid)?, b"payload");

        backend.create_reference("refs/strata/metadata/x", &oid, true, "test")?;
        assert_eq!(backend.find_reference("refs/strata/metadata/x")?, Some(oid));
        backend.delete_reference("refs/strata/metadata/x")?;
        assert_eq!(backend.find_reference("refs/strata/metadata/x")?, None);
        backend.delete_reference("refs/strata/metadata/x")?;
        Ok(())
    }
}
