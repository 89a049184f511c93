//! Request/response types for the host client.

use serde::{Deserialize, Serialize};

/// Fields for creating a pull request.
#[derive(Debug, Clone, Default)]
pub struct PrCreateParams {
    pub title: String,
    pub body: String,
    /// Branch being merged.
    pub head: String,
    /// Branch being merged into.
    pub base: String,
    pub draft: bool,
    pub reviewers: Vec<String>,
    pub team_reviewers: Vec<String>,
}

/// Fields for updating a pull request. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct PrUpdateParams {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base: Option<String>,
    /// Desired draft state. The host needs a separate transition for this;
    /// the adapter hides that.
    pub draft: Option<bool>,
    pub reviewers: Vec<String>,
    pub team_reviewers: Vec<String>,
    pub rerequest_review: bool,
}

/// How the host combines commits on merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Squash => "squash",
            MergeMethod::Merge => "merge",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "squash" => Ok(MergeMethod::Squash),
            "merge" => Ok(MergeMethod::Merge),
            "rebase" => Ok(MergeMethod::Rebase),
            other => Err(format!("unknown merge method '{}'", other)),
        }
    }
}

/// One CI check on a PR head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    /// Host-reported state, e.g. "SUCCESS", "FAILURE", "PENDING".
    pub state: String,
}

/// Aggregate CI status for a branch.
#[derive(Debug, Clone, Default)]
pub struct ChecksSummary {
    /// All required checks passed.
    pub passing: bool,
    /// Some checks are still running.
    pub pending: bool,
    pub details: Vec<CheckRun>,
}

impl ChecksSummary {
    pub fn from_runs(details: Vec<CheckRun>) -> Self {
        let pending = details
            .iter()
            .any(|c| matches!(c.state.to_ascii_uppercase().as_str(), "PENDING" | "IN_PROGRESS" | "QUEUED"));
        let failing = details
            .iter()
            .any(|c| matches!(c.state.to_ascii_uppercase().as_str(), "FAILURE" | "ERROR" | "CANCELLED"));
        Self {
            passing: !failing && !pending,
            pending,
            details,
        }
    }

    pub fn failing(&self) -> bool {
        !self.passing && !self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, state: &str) -> CheckRun {
        CheckRun {
            name: name.to_string(),
            state: state.to_string(),
        }
    }

    #[test]
    fn merge_method_round_trips() {
        assert_eq!("squash".parse::<MergeMethod>().unwrap(), MergeMethod::Squash);
        assert_eq!("REBASE".parse::<MergeMethod>().unwrap(), MergeMethod::Rebase);
        assert!("octopus".parse::<MergeMethod>().is_err());
        assert_eq!(MergeMethod::Merge.to_string(), "merge");
    }

    #[test]
    fn checks_summary_classifies_states() {
        let all_green = ChecksSummary::from_runs(vec![run("build", "SUCCESS"), run("test", "success")]);
        assert!(all_green.passing);
        assert!(!all_green.pending);
        assert!(!all_green.failing());

        let pending = ChecksSummary::from_runs(vec![run("build", "SUCCESS"), run("test", "PENDING")]);
        assert!(!pending.passing);
        assert!(pending.pending);
        assert!(!pending.failing());

        let failed = ChecksSummary::from_runs(vec![run("build", "FAILURE")]);
        assert!(!failed.passing);
        assert!(failed.failing());
    }

    #[test]
    fn no_checks_counts_as_passing() {
        let empty = ChecksSummary::from_runs(vec![]);
        assert!(empty.passing);
        assert!(!empty.pending);
    }
}
