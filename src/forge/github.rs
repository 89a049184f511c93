//! GitHub adapter shelling out to the `gh` CLI.
//!
//! Using the CLI keeps credentials out of this process entirely: `gh` owns
//! auth, hostname selection (github.com vs. enterprise), and the wire
//! protocol. Draft state cannot be flipped through the plain edit endpoint,
//! so the adapter issues the separate ready/undo transition; callers just
//! pass the boolean they want.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;

use crate::errors::StackError;
use crate::forge::types::{CheckRun, ChecksSummary, MergeMethod, PrCreateParams, PrUpdateParams};
use crate::metadata::{PrInfo, PrState};

/// Deadline for a single `gh` invocation.
const HOST_DEADLINE: Duration = Duration::from_secs(300);

pub struct GithubCli {
    workdir: PathBuf,
    owner: String,
    repo: String,
}

/// Shape of `gh pr view --json ...` output.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPrView {
    number: u64,
    title: String,
    body: String,
    state: String,
    base_ref_name: String,
    url: String,
    #[serde(default)]
    is_draft: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheckRun {
    name: String,
    state: String,
}

impl GithubCli {
    pub fn new(workdir: PathBuf, owner: String, repo: String) -> Self {
        Self { workdir, owner, repo }
    }

    fn repo_arg(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Run `gh`, capturing output under the host deadline.
    async fn run_gh(&self, args: &[&str]) -> Result<String, GhFailure> {
        let mut child = tokio::process::Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GhFailure {
                stderr: format!("failed to run gh: {}", e),
                not_found: false,
            })?;

        let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr is piped");
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let waited = tokio::time::timeout(HOST_DEADLINE, async {
            let _ = tokio::join!(stdout_pipe.read_to_end(&mut stdout), stderr_pipe.read_to_end(&mut stderr));
            child.wait().await
        })
        .await;

        let stderr_text = String::from_utf8_lossy(&stderr).into_owned();
        match waited {
            Ok(Ok(status)) if status.success() => Ok(String::from_utf8_lossy(&stdout).into_owned()),
            Ok(Ok(_)) => Err(GhFailure {
                not_found: stderr_text.contains("no pull requests found")
                    || stderr_text.contains("Could not resolve to a PullRequest"),
                stderr: stderr_text,
            }),
            Ok(Err(e)) => Err(GhFailure {
                stderr: format!("gh did not run: {}", e),
                not_found: false,
            }),
            Err(_elapsed) => {
                let _ = child.kill().await;
                Err(GhFailure {
                    stderr: format!("gh timed out after {:?}: {}", HOST_DEADLINE, stderr_text.trim()),
                    not_found: false,
                })
            }
        }
    }

    fn host_error(context: &str, failure: GhFailure) -> anyhow::Error {
        StackError::Host(format!("{}: {}", context, failure.stderr.trim())).into()
    }
}

struct GhFailure {
    stderr: String,
    not_found: bool,
}

fn parse_state(raw: &str) -> PrState {
    match raw.to_ascii_uppercase().as_str() {
        "MERGED" => PrState::Merged,
        "CLOSED" => PrState::Closed,
        _ => PrState::Open,
    }
}

fn to_pr_info(view: GhPrView) -> PrInfo {
    let state = parse_state(&view.state);
    PrInfo {
        number: view.number,
        title: Some(view.title),
        body: Some(view.body),
        state,
        base_branch: Some(view.base_ref_name),
        url: Some(view.url),
        is_draft: view.is_draft,
    }
}

#[async_trait]
impl super::HostClient for GithubCli {
    fn owner_repo(&self) -> (String, String) {
        (self.owner.clone(), self.repo.clone())
    }

    async fn get_pr_by_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PrInfo>> {
        let repo_arg = format!("{}/{}", owner, repo);
        let result = self
            .run_gh(&[
                "pr",
                "view",
                branch,
                "--repo",
                &repo_arg,
                "--json",
                "number,title,body,state,baseRefName,url,isDraft",
            ])
            .await;

        match result {
            Ok(raw) => {
                let view: GhPrView = serde_json::from_str(&raw)
                    .map_err(|e| StackError::Host(format!("unexpected gh pr view output: {}", e)))?;
                Ok(Some(to_pr_info(view)))
            }
            Err(failure) if failure.not_found => Ok(None),
            Err(failure) => Err(Self::host_error(&format!("looking up PR for '{}'", branch), failure)),
        }
    }

    async fn create_pr(&self, owner: &str, repo: &str, params: &PrCreateParams) -> Result<PrInfo> {
        let repo_arg = format!("{}/{}", owner, repo);
        let mut args: Vec<&str> = vec![
            "pr",
            "create",
            "--repo",
            &repo_arg,
            "--head",
            &params.head,
            "--base",
            &params.base,
            "--title",
            &params.title,
            "--body",
            &params.body,
        ];
        if params.draft {
            args.push("--draft");
        }
        for reviewer in &params.reviewers {
            args.push("--reviewer");
            args.push(reviewer);
        }
        // gh addresses team reviewers through the same flag as org/team
        let team_args: Vec<String> = params.team_reviewers.iter().map(|t| t.to_string()).collect();
        for team in &team_args {
            args.push("--reviewer");
            args.push(team);
        }

        self.run_gh(&args)
            .await
            .map_err(|f| Self::host_error(&format!("creating PR for '{}'", params.head), f))?;

        // gh prints the URL; re-read through the JSON view for a full record
        self.get_pr_by_branch(owner, repo, &params.head)
            .await?
            .ok_or_else(|| StackError::Host(format!("PR for '{}' vanished after creation", params.head)).into())
    }

    async fn update_pr(&self, owner: &str, repo: &str, number: u64, params: &PrUpdateParams) -> Result<()> {
        let repo_arg = format!("{}/{}", owner, repo);
        let number_arg = number.to_string();

        let mut edit_args: Vec<&str> = vec!["pr", "edit", &number_arg, "--repo", &repo_arg];
        // Re-requesting review on this host is re-adding the reviewers, so a
        // bare re-request with reviewers present still goes through pr edit.
        let mut any_edit = params.rerequest_review && !params.reviewers.is_empty();
        if let Some(title) = &params.title {
            edit_args.extend_from_slice(&["--title", title]);
            any_edit = true;
        }
        if let Some(body) = &params.body {
            edit_args.extend_from_slice(&["--body", body]);
            any_edit = true;
        }
        if let Some(base) = &params.base {
            edit_args.extend_from_slice(&["--base", base]);
            any_edit = true;
        }
        for reviewer in &params.reviewers {
            edit_args.extend_from_slice(&["--add-reviewer", reviewer]);
            any_edit = true;
        }
        for team in &params.team_reviewers {
            edit_args.extend_from_slice(&["--add-reviewer", team]);
            any_edit = true;
        }
        if any_edit {
            self.run_gh(&edit_args)
                .await
                .map_err(|f| Self::host_error(&format!("editing PR #{}", number), f))?;
        }

        // Draft state needs its own transition; the edit endpoint cannot do it.
        if let Some(draft) = params.draft {
            let mut ready_args: Vec<&str> = vec!["pr", "ready", &number_arg, "--repo", &repo_arg];
            if draft {
                ready_args.push("--undo");
            }
            self.run_gh(&ready_args)
                .await
                .map_err(|f| Self::host_error(&format!("changing draft state of PR #{}", number), f))?;
        }

        Ok(())
    }

    async fn merge_pr(&self, branch: &str, method: MergeMethod) -> Result<()> {
        let repo_arg = self.repo_arg();
        let method_flag = match method {
            MergeMethod::Squash => "--squash",
            MergeMethod::Merge => "--merge",
            MergeMethod::Rebase => "--rebase",
        };
        self.run_gh(&["pr", "merge", branch, "--repo", &repo_arg, method_flag])
            .await
            .map_err(|f| Self::host_error(&format!("merging PR for '{}'", branch), f))?;
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<()> {
        let repo_arg = self.repo_arg();
        let number_arg = number.to_string();
        self.run_gh(&["pr", "close", &number_arg, "--repo", &repo_arg])
            .await
            .map_err(|f| Self::host_error(&format!("closing PR #{}", number), f))?;
        Ok(())
    }

    async fn get_checks(&self, branch: &str) -> Result<ChecksSummary> {
        let repo_arg = self.repo_arg();
        let result = self
            .run_gh(&["pr", "checks", branch, "--repo", &repo_arg, "--json", "name,state"])
            .await;

        match result {
            Ok(raw) => {
                let runs: Vec<GhCheckRun> = serde_json::from_str(&raw)
                    .map_err(|e| StackError::Host(format!("unexpected gh pr checks output: {}", e)))?;
                Ok(ChecksSummary::from_runs(
                    runs.into_iter()
                        .map(|r| CheckRun {
                            name: r.name,
                            state: r.state,
                        })
                        .collect(),
                ))
            }
            // "no checks" exits non-zero but is not a failure for us
            Err(failure) if failure.stderr.contains("no checks reported") => Ok(ChecksSummary::from_runs(vec![])),
            Err(failure) => Err(Self::host_error(&format!("reading checks for '{}'", branch), failure)),
        }
    }
}
