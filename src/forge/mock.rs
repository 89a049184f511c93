//! In-process host for tests.
//!
//! Holds PR state in memory and can be primed to fail specific operations,
//! so engine tests cover host outages without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::errors::StackError;
use crate::forge::types::{ChecksSummary, MergeMethod, PrCreateParams, PrUpdateParams};
use crate::metadata::{PrInfo, PrState};

use super::HostClient;

#[derive(Default)]
struct MockState {
    /// branch → PR snapshot
    prs: HashMap<String, PrInfo>,
    /// branch → checks
    checks: HashMap<String, ChecksSummary>,
    /// operations primed to fail: "get_pr:branch", "merge:branch", ...
    failures: HashMap<String, String>,
    /// observed calls, for assertions
    calls: Vec<String>,
}

pub struct MockHost {
    owner: String,
    repo: String,
    state: Mutex<MockState>,
    next_number: AtomicU64,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            state: Mutex::new(MockState::default()),
            next_number: AtomicU64::new(100),
        }
    }

    /// Prime a PR for a branch.
    pub fn set_pr(&self, branch: &str, pr: PrInfo) {
        self.state.lock().unwrap().prs.insert(branch.to_string(), pr);
    }

    /// Convenience: an open PR with the given number and base.
    pub fn open_pr(&self, branch: &str, number: u64, base: &str) {
        self.set_pr(
            branch,
            PrInfo {
                number,
                title: Some(format!("PR for {}", branch)),
                body: None,
                state: PrState::Open,
                base_branch: Some(base.to_string()),
                url: Some(format!("https://github.com/acme/widgets/pull/{}", number)),
                is_draft: false,
            },
        );
    }

    pub fn set_pr_state(&self, branch: &str, pr_state: PrState) {
        if let Some(pr) = self.state.lock().unwrap().prs.get_mut(branch) {
            pr.state = pr_state;
        }
    }

    pub fn set_checks(&self, branch: &str, checks: ChecksSummary) {
        self.state.lock().unwrap().checks.insert(branch.to_string(), checks);
    }

    /// Make one operation fail with the given message. Keys:
    /// `get_pr:<branch>`, `create:<branch>`, `update:<number>`,
    /// `merge:<branch>`, `checks:<branch>`, `close:<number>`.
    pub fn fail(&self, key: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(key.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pr(&self, branch: &str) -> Option<PrInfo> {
        self.state.lock().unwrap().prs.get(branch).cloned()
    }

    fn record(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(key.to_string());
        if let Some(message) = state.failures.get(key) {
            return Err(StackError::Host(message.clone()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl HostClient for MockHost {
    fn owner_repo(&self) -> (String, String) {
        (self.owner.clone(), self.repo.clone())
    }

    async fn get_pr_by_branch(&self, _owner: &str, _repo: &str, branch: &str) -> Result<Option<PrInfo>> {
        self.record(&format!("get_pr:{}", branch))?;
        Ok(self.state.lock().unwrap().prs.get(branch).cloned())
    }

    async fn create_pr(&self, _owner: &str, _repo: &str, params: &PrCreateParams) -> Result<PrInfo> {
        self.record(&format!("create:{}", params.head))?;
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let pr = PrInfo {
            number,
            title: Some(params.title.clone()),
            body: Some(params.body.clone()),
            state: PrState::Open,
            base_branch: Some(params.base.clone()),
            url: Some(format!("https://github.com/{}/{}/pull/{}", self.owner, self.repo, number)),
            is_draft: params.draft,
        };
        self.state.lock().unwrap().prs.insert(params.head.clone(), pr.clone());
        Ok(pr)
    }

    async fn update_pr(&self, _owner: &str, _repo: &str, number: u64, params: &PrUpdateParams) -> Result<()> {
        self.record(&format!("update:{}", number))?;
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .values_mut()
            .find(|pr| pr.number == number)
            .ok_or_else(|| StackError::Host(format!("no PR #{}", number)))?;
        if let Some(title) = &params.title {
            pr.title = Some(title.clone());
        }
        if let Some(body) = &params.body {
            pr.body = Some(body.clone());
        }
        if let Some(base) = &params.base {
            pr.base_branch = Some(base.clone());
        }
        if let Some(draft) = params.draft {
            pr.is_draft = draft;
        }
        Ok(())
    }

    async fn merge_pr(&self, branch: &str, _method: MergeMethod) -> Result<()> {
        self.record(&format!("merge:{}", branch))?;
        let mut state = self.state.lock().unwrap();
        let pr = state
            .prs
            .get_mut(branch)
            .ok_or_else(|| StackError::Host(format!("no PR for branch '{}'", branch)))?;
        pr.state = PrState::Merged;
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<()> {
        self.record(&format!("close:{}", number))?;
        let mut state = self.state.lock().unwrap();
        if let Some(pr) = state.prs.values_mut().find(|pr| pr.number == number) {
            pr.state = PrState::Closed;
        }
        Ok(())
    }

    async fn get_checks(&self, branch: &str) -> Result<ChecksSummary> {
        self.record(&format!("checks:{}", branch))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .checks
            .get(branch)
            .cloned()
            .unwrap_or_else(|| ChecksSummary::from_runs(vec![])))
    }
}
