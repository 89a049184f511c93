//! Branch metadata document.
//!
//! Stored as a JSON blob referenced by `refs/strata/metadata/<branch>`.
//! Every field is optional and unknown keys are tolerated, so older and newer
//! versions of the tool can share a repository.

use serde::{Deserialize, Serialize};

/// Per-branch record persisted in the object database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BranchMetadata {
    /// Parent in the stack. Empty for trunk and untracked branches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_name: Option<String>,

    /// Commit id of the parent when this branch was last tracked or
    /// restacked. Must stay reachable from the branch tip; commits in
    /// `(parentBranchRevision, tip]` are the branch's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_revision: Option<String>,

    /// Snapshot of the branch's pull request on the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,

    /// Free-form tag grouping branches for bulk operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl BranchMetadata {
    /// A record with no fields set: what reading an absent ref yields.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Tracked means a parent is recorded.
    pub fn is_tracked(&self) -> bool {
        self.parent_branch_name.is_some()
    }

    pub fn parse(raw: &[u8]) -> anyhow::Result<Self> {
        let meta = serde_json::from_slice(raw)?;
        Ok(meta)
    }

    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }
}

/// Mirror of the host-side pull request state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    pub number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub state: PrState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Closed => write!(f, "closed"),
            PrState::Merged => write!(f, "merged"),
        }
    }
}
