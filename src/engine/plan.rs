//! Stacked merge planning and execution.
//!
//! A `Plan` is data: an ordered step list plus a validation verdict and a
//! content digest, so what was shown to the user is provably what executes.
//! Planning never mutates anything; execution replays the steps through the
//! host and the gateway.

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::errors::StackError;
use crate::events::Event;
use crate::forge::{ChecksSummary, MergeMethod};
use crate::metadata::PrState;
use crate::state::OperationKind;

use super::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Merge each PR from the bottom of the stack upward.
    BottomUp,
    /// Squash the whole range into one commit on a synthesized PR.
    TopDown,
    /// One PR with the stack's full diff, history preserved.
    Consolidate,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::BottomUp => write!(f, "bottom-up"),
            MergeStrategy::TopDown => write!(f, "top-down"),
            MergeStrategy::Consolidate => write!(f, "consolidate"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bottom-up" | "bottomup" => Ok(MergeStrategy::BottomUp),
            "top-down" | "topdown" => Ok(MergeStrategy::TopDown),
            "consolidate" => Ok(MergeStrategy::Consolidate),
            other => Err(format!(
                "unknown merge strategy '{}'; expected bottom-up, top-down, or consolidate",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Merge the PR on the host and delete the local branch.
    MergePr,
    /// Squash the range into one commit and push it to a synthesized branch.
    PushSquashed,
    /// Open the consolidated PR.
    CreatePr,
    /// Close an intermediate PR without merging it.
    ClosePr,
    /// Restack upstack branches onto the trunk afterwards.
    RestackUpstack,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub description: String,
    pub branch: Option<String>,
    pub pr_number: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub strategy: MergeStrategy,
    pub target: String,
    /// Bottom-to-top chain the plan covers.
    pub chain: Vec<String>,
    pub steps: Vec<Step>,
    pub validation: Validation,
    /// Descendants of the target that stay behind and get restacked.
    pub upstack: Vec<String>,
    /// Stable digest over strategy and steps.
    pub digest: String,
}

impl Engine {
    /// Produce a merge plan for the target's stack (or a scope tag's chain).
    pub async fn plan_merge(
        &self,
        target: Option<&str>,
        strategy: MergeStrategy,
        scope: Option<&str>,
    ) -> Result<Plan> {
        let mut infos = Vec::new();
        let (chain, target) = self.plan_chain(target, scope, &mut infos)?;

        // Upstack: descendants of the target that the plan does not merge
        let upstack: Vec<String> = self
            .graph()
            .descendants(&target)?
            .into_iter()
            .filter(|name| !chain.contains(name))
            .collect();
        for name in &upstack {
            infos.push(format!("'{}' stays behind and will be restacked on {}", name, self.trunk()));
        }

        let validation = self.validate_plan(&chain, infos).await?;
        let steps = self.build_steps(&chain, &target, strategy, &upstack);
        let digest = digest_steps(strategy, &steps);

        Ok(Plan {
            strategy,
            target,
            chain,
            steps,
            validation,
            upstack,
            digest,
        })
    }

    fn plan_chain(
        &self,
        target: Option<&str>,
        scope: Option<&str>,
        infos: &mut Vec<String>,
    ) -> Result<(Vec<String>, String)> {
        if let Some(tag) = scope {
            let members: Vec<String> = self
                .graph()
                .tracked_branches()
                .into_iter()
                .filter(|name| {
                    self.graph()
                        .node(name)
                        .and_then(|node| node.meta.scope.as_deref())
                        == Some(tag)
                })
                .collect();
            if members.is_empty() {
                return Err(StackError::User(format!("no tracked branches carry scope '{}'", tag)).into());
            }
            let chain = self.graph().sort_topologically(&members);
            // The scope must be downstack-closed or the merges would land
            // out from under unmerged parents.
            for name in &chain {
                let parent = self.graph().parent_of(name).unwrap_or_default();
                if parent != self.trunk() && !chain.contains(&parent.to_string()) {
                    return Err(StackError::User(format!(
                        "scope '{}' skips '{}', the parent of '{}'; include the whole chain",
                        tag, parent, name
                    ))
                    .into());
                }
            }
            let target = chain.last().cloned().expect("non-empty chain");
            return Ok((chain, target));
        }

        let target = match target {
            Some(name) => name.to_string(),
            None => {
                let current = self.gateway().require_current_branch()?;
                if self.graph().is_trunk(&current) {
                    return Err(StackError::User("cannot merge the trunk; check out a stack branch".into()).into());
                }
                current
            }
        };
        if !self.graph().is_tracked(&target) {
            return Err(StackError::User(format!("branch '{}' is not tracked", target)).into());
        }

        let chain = self.graph().full_stack(&target)?;
        for name in &chain {
            if name != &target {
                infos.push(format!("'{}' is below '{}' and is included automatically", name, target));
            }
        }
        Ok((chain, target))
    }

    async fn validate_plan(&self, chain: &[String], infos: Vec<String>) -> Result<Validation> {
        let mut validation = Validation {
            infos,
            ..Default::default()
        };

        for branch in chain {
            let node = self
                .graph()
                .node(branch)
                .ok_or_else(|| StackError::Internal(format!("planned branch '{}' missing from graph", branch)))?;
            let parent = node.parent.clone().unwrap_or_default();

            let Some(pr) = &node.meta.pr_info else {
                validation
                    .errors
                    .push(format!("'{}' has no pull request; submit the stack first", branch));
                continue;
            };
            if pr.state != PrState::Open {
                validation
                    .errors
                    .push(format!("PR #{} for '{}' is {}", pr.number, branch, pr.state));
            }
            if pr.is_draft {
                validation
                    .errors
                    .push(format!("PR #{} for '{}' is a draft", pr.number, branch));
            }
            if let Some(base) = &pr.base_branch {
                if base != &parent {
                    validation.errors.push(format!(
                        "PR #{} for '{}' is based on '{}' on the remote, but its recorded parent is '{}'",
                        pr.number, branch, base, parent
                    ));
                }
            }

            // Unpushed commits only warn; the merge would just miss them
            if let Some(remote_tip) = self.gateway().remote_tracking_tip(branch)? {
                let local_tip = self.gateway().resolve(branch)?;
                if remote_tip != local_tip {
                    validation
                        .warnings
                        .push(format!("'{}' has commits that are not on the remote", branch));
                }
            }

            match self.checks_for(branch).await {
                Some(checks) if checks.failing() => {
                    validation.errors.push(format!("required checks are failing on '{}'", branch));
                }
                Some(checks) if checks.pending => {
                    validation.warnings.push(format!("checks are still running on '{}'", branch));
                }
                Some(_) => {}
                None => validation
                    .warnings
                    .push(format!("check status for '{}' is unavailable", branch)),
            }
        }

        validation.valid = validation.errors.is_empty();
        Ok(validation)
    }

    async fn checks_for(&self, branch: &str) -> Option<ChecksSummary> {
        let host = self.host.as_deref()?;
        host.get_checks(branch).await.ok()
    }

    fn build_steps(&self, chain: &[String], target: &str, strategy: MergeStrategy, upstack: &[String]) -> Vec<Step> {
        let pr_number = |branch: &str| -> Option<u64> {
            self.graph()
                .node(branch)
                .and_then(|node| node.meta.pr_info.as_ref())
                .map(|pr| pr.number)
        };

        let mut steps = Vec::new();
        match strategy {
            MergeStrategy::BottomUp => {
                for branch in chain {
                    let number = pr_number(branch);
                    steps.push(Step {
                        kind: StepKind::MergePr,
                        description: match number {
                            Some(number) => {
                                format!("merge PR #{} ('{}') and delete the local branch", number, branch)
                            }
                            None => format!("merge the PR for '{}' and delete the local branch", branch),
                        },
                        branch: Some(branch.clone()),
                        pr_number: number,
                    });
                }
            }
            MergeStrategy::TopDown => {
                let squash_branch = synthesized_branch(target);
                steps.push(Step {
                    kind: StepKind::PushSquashed,
                    description: format!(
                        "squash every commit between {} and '{}' into one commit and push it to '{}'",
                        self.trunk(),
                        target,
                        squash_branch
                    ),
                    branch: Some(target.to_string()),
                    pr_number: None,
                });
                steps.push(Step {
                    kind: StepKind::MergePr,
                    description: format!("merge the synthesized PR for '{}'", squash_branch),
                    branch: Some(squash_branch),
                    pr_number: None,
                });
                for branch in chain {
                    if let Some(number) = pr_number(branch) {
                        steps.push(Step {
                            kind: StepKind::ClosePr,
                            description: format!("close intermediate PR #{} ('{}')", number, branch),
                            branch: Some(branch.clone()),
                            pr_number: Some(number),
                        });
                    }
                }
            }
            MergeStrategy::Consolidate => {
                steps.push(Step {
                    kind: StepKind::CreatePr,
                    description: format!(
                        "open one PR carrying the full diff of '{}' against {}",
                        target,
                        self.trunk()
                    ),
                    branch: Some(target.to_string()),
                    pr_number: None,
                });
                steps.push(Step {
                    kind: StepKind::MergePr,
                    description: format!("merge the consolidated PR for '{}'", target),
                    branch: Some(target.to_string()),
                    pr_number: None,
                });
                for branch in chain {
                    if branch == target {
                        continue;
                    }
                    if let Some(number) = pr_number(branch) {
                        steps.push(Step {
                            kind: StepKind::ClosePr,
                            description: format!("close intermediate PR #{} ('{}') without merging", number, branch),
                            branch: Some(branch.clone()),
                            pr_number: Some(number),
                        });
                    }
                }
            }
        }

        if !upstack.is_empty() {
            steps.push(Step {
                kind: StepKind::RestackUpstack,
                description: format!("restack {} on {}", upstack.join(", "), self.trunk()),
                branch: None,
                pr_number: None,
            });
        }
        steps
    }

    /// Execute a plan. Validation errors block unless `force`; warnings
    /// never block.
    pub async fn execute_merge_plan(&mut self, plan: &Plan, method: MergeMethod, force: bool) -> Result<()> {
        if !plan.validation.valid && !force {
            return Err(StackError::Precondition(format!(
                "merge plan is not valid:\n  {}",
                plan.validation.errors.join("\n  ")
            ))
            .into());
        }

        let total = plan.steps.len();
        for (index, step) in plan.steps.iter().enumerate() {
            self.emit(Event::PlanStep {
                index,
                total,
                description: step.description.clone(),
            });
            match step.kind {
                StepKind::MergePr => {
                    let branch = step.branch.clone().expect("merge step has a branch");
                    {
                        let host = self.host()?;
                        host.merge_pr(&branch, method).await?;
                    }
                    if self.graph().is_tracked(&branch) {
                        self.remove_landed_branch(&branch)?;
                    }
                }
                StepKind::PushSquashed => {
                    let target = step.branch.clone().expect("squash step has a branch");
                    let squash_branch = synthesized_branch(&target);
                    let trunk = self.trunk().to_string();
                    let message = format!("{} (squashed stack)", target);
                    let squashed = self.gateway().commit_tree_of(&target, &trunk, &message)?;
                    if self.gateway().branch_exists(&squash_branch)? {
                        self.gateway().force_branch_ref(&squash_branch, &squashed)?;
                    } else {
                        self.gateway().create_branch_at(&squash_branch, squashed.as_str())?;
                    }
                    self.gateway().push_force_with_lease(&squash_branch).await?;
                    let (owner, repo) = self.host()?.owner_repo();
                    let params = crate::forge::PrCreateParams {
                        title: message.clone(),
                        body: format!("Squashed stack ending at '{}'.", target),
                        head: squash_branch.clone(),
                        base: trunk,
                        ..Default::default()
                    };
                    let pr = self.host()?.create_pr(&owner, &repo, &params).await?;
                    self.emit(Event::PrCreated {
                        branch: squash_branch,
                        number: pr.number,
                        url: pr.url.unwrap_or_default(),
                    });
                }
                StepKind::CreatePr => {
                    let target = step.branch.clone().expect("create step has a branch");
                    let trunk = self.trunk().to_string();
                    self.gateway().push_force_with_lease(&target).await?;
                    let (owner, repo) = self.host()?.owner_repo();
                    let params = crate::forge::PrCreateParams {
                        title: format!("{} (consolidated stack)", target),
                        body: format!("Full diff of the stack ending at '{}'.", target),
                        head: target.clone(),
                        base: trunk,
                        ..Default::default()
                    };
                    let pr = self.host()?.create_pr(&owner, &repo, &params).await?;
                    self.emit(Event::PrCreated {
                        branch: target,
                        number: pr.number,
                        url: pr.url.unwrap_or_default(),
                    });
                }
                StepKind::ClosePr => {
                    if let Some(number) = step.pr_number {
                        self.host()?.close_pr(number).await?;
                    }
                }
                StepKind::RestackUpstack => {
                    let upstack = plan.upstack.clone();
                    self.restack_branches(OperationKind::Sync, &upstack)?;
                }
            }
        }
        Ok(())
    }

    /// Local bookkeeping once a branch's work has landed on the remote:
    /// rewire children to the grandparent, drop the branch and its record.
    pub(crate) fn remove_landed_branch(&mut self, branch: &str) -> Result<Vec<String>> {
        let parent = self
            .graph()
            .parent_of(branch)
            .unwrap_or(self.trunk())
            .to_string();

        let mut rewired = Vec::new();
        for child in self.graph().children_of(branch) {
            let mut meta = self.store().read(&child)?;
            meta.parent_branch_name = Some(parent.clone());
            self.store().write(&child, &meta)?;
            self.graph_mut().set_parent(&child, &parent);
            self.emit(Event::ChildRewired {
                child: child.clone(),
                new_parent: parent.clone(),
            });
            rewired.push(child);
        }

        if self.gateway().current_branch()? == Some(branch.to_string()) {
            let trunk = self.trunk().to_string();
            self.gateway().checkout(&trunk)?;
        }
        if self.gateway().branch_exists(branch)? {
            self.gateway().delete_branch(branch)?;
        }
        self.store().delete(branch)?;
        self.graph_mut().remove(branch);
        Ok(rewired)
    }
}

fn synthesized_branch(target: &str) -> String {
    format!("{}-squash", target)
}

fn digest_steps(strategy: MergeStrategy, steps: &[Step]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(strategy.to_string().as_bytes());
    for step in steps {
        hasher.update([0u8]);
        hasher.update(step.description.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests_support::{fixture, load_engine_with, track_branch};
    use crate::forge::types::CheckRun;
    use crate::forge::MockHost;
    use crate::metadata::{BranchMetadata, PrInfo};
    use crate::test_context::{branch_at_head, checkout, commit_file};

    fn open_pr(number: u64, base: &str) -> PrInfo {
        PrInfo {
            number,
            title: Some(format!("PR {}", number)),
            body: None,
            state: PrState::Open,
            base_branch: Some(base.to_string()),
            url: Some(format!("https://github.com/acme/widgets/pull/{}", number)),
            is_draft: false,
        }
    }

    fn record_pr(root: &std::path::Path, branch: &str, pr: PrInfo) -> Result<()> {
        let gateway = crate::git_gateway::GitGateway::from_path(root)?;
        let store = crate::metadata::MetadataStore::from_gateway(gateway);
        let mut meta = store.read(branch)?;
        meta.pr_info = Some(pr);
        store.write(branch, &meta)
    }

    /// main ← a ← b ← c with one commit each and open PRs on matching bases.
    async fn stacked_fixture() -> Result<(
        tempfile::TempDir,
        git2::Repository,
        crate::test_context::FixtureContext,
    )> {
        let (dir, repo, ctx) = fixture()?;
        for (branch, parent) in [("a", "main"), ("b", "a"), ("c", "b")] {
            checkout(&repo, parent)?;
            branch_at_head(&repo, branch)?;
            checkout(&repo, branch)?;
            commit_file(&repo, &format!("{}.txt", branch), branch, &format!("{}1", branch))?;
            track_branch(dir.path(), branch, parent)?;
        }
        record_pr(dir.path(), "a", open_pr(1, "main"))?;
        record_pr(dir.path(), "b", open_pr(2, "a"))?;
        record_pr(dir.path(), "c", open_pr(3, "b"))?;
        Ok((dir, repo, ctx))
    }

    fn passing_checks() -> ChecksSummary {
        ChecksSummary::from_runs(vec![CheckRun {
            name: "ci".to_string(),
            state: "SUCCESS".to_string(),
        }])
    }

    #[tokio::test]
    async fn bottom_up_plan_lists_merges_in_stack_order() -> Result<()> {
        // S6
        let (_dir, _repo, _ctx) = stacked_fixture().await?;
        let host = MockHost::new();
        for branch in ["a", "b", "c"] {
            host.set_checks(branch, passing_checks());
        }

        let engine = load_engine_with(Box::new(host)).await?;
        let plan = engine.plan_merge(Some("c"), MergeStrategy::BottomUp, None).await?;

        assert!(plan.validation.valid, "errors: {:?}", plan.validation.errors);
        assert!(plan.upstack.is_empty());
        assert_eq!(plan.chain, vec!["a", "b", "c"]);

        let merges: Vec<(&str, Option<u64>)> = plan
            .steps
            .iter()
            .filter(|step| step.kind == StepKind::MergePr)
            .map(|step| (step.branch.as_deref().unwrap(), step.pr_number))
            .collect();
        assert_eq!(
            merges,
            vec![("a", Some(1)), ("b", Some(2)), ("c", Some(3))]
        );
        assert!(!plan.digest.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn draft_and_base_mismatch_are_blocking_errors() -> Result<()> {
        let (dir, _repo, _ctx) = stacked_fixture().await?;
        // b: draft; c: remote base says main but parent is b
        let mut draft = open_pr(2, "a");
        draft.is_draft = true;
        record_pr(dir.path(), "b", draft)?;
        record_pr(dir.path(), "c", open_pr(3, "main"))?;

        let host = MockHost::new();
        for branch in ["a", "b", "c"] {
            host.set_checks(branch, passing_checks());
        }

        let engine = load_engine_with(Box::new(host)).await?;
        let plan = engine.plan_merge(Some("c"), MergeStrategy::BottomUp, None).await?;

        assert!(!plan.validation.valid);
        assert!(plan.validation.errors.iter().any(|e| e.contains("draft")));
        assert!(plan.validation.errors.iter().any(|e| e.contains("based on")));

        // Execution without force refuses
        let mut engine = engine;
        let err = engine
            .execute_merge_plan(&plan, MergeMethod::Squash, false)
            .await
            .unwrap_err();
        assert_eq!(crate::errors::exit_code(&err), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pending_checks_warn_and_failing_checks_block() -> Result<()> {
        let (_dir, _repo, _ctx) = stacked_fixture().await?;
        let host = MockHost::new();
        host.set_checks("a", passing_checks());
        host.set_checks(
            "b",
            ChecksSummary::from_runs(vec![CheckRun {
                name: "ci".into(),
                state: "PENDING".into(),
            }]),
        );
        host.set_checks(
            "c",
            ChecksSummary::from_runs(vec![CheckRun {
                name: "ci".into(),
                state: "FAILURE".into(),
            }]),
        );

        let engine = load_engine_with(Box::new(host)).await?;
        let plan = engine.plan_merge(Some("c"), MergeStrategy::BottomUp, None).await?;

        assert!(!plan.validation.valid);
        assert!(plan.validation.warnings.iter().any(|w| w.contains("running")));
        assert!(plan.validation.errors.iter().any(|e| e.contains("failing")));
        Ok(())
    }

    #[tokio::test]
    async fn upstack_branches_are_recorded_as_infos() -> Result<()> {
        let (dir, repo, _ctx) = stacked_fixture().await?;
        // c gets a child d outside the plan for target b
        checkout(&repo, "c")?;
        branch_at_head(&repo, "d")?;
        checkout(&repo, "d")?;
        commit_file(&repo, "d.txt", "d", "d1")?;
        track_branch(dir.path(), "d", "c")?;

        let host = MockHost::new();
        let engine = load_engine_with(Box::new(host)).await?;
        let plan = engine.plan_merge(Some("b"), MergeStrategy::BottomUp, None).await?;

        assert_eq!(plan.chain, vec!["a", "b"]);
        assert_eq!(plan.upstack, vec!["c", "d"]);
        assert!(plan
            .steps
            .iter()
            .any(|step| step.kind == StepKind::RestackUpstack));
        assert!(plan.validation.infos.iter().any(|i| i.contains("restacked")));
        Ok(())
    }

    #[tokio::test]
    async fn top_down_and_consolidate_close_intermediates() -> Result<()> {
        let (_dir, _repo, _ctx) = stacked_fixture().await?;
        let host = MockHost::new();
        let engine = load_engine_with(Box::new(host)).await?;

        let top_down = engine.plan_merge(Some("c"), MergeStrategy::TopDown, None).await?;
        assert!(top_down.steps.iter().any(|s| s.kind == StepKind::PushSquashed));
        let closes: Vec<u64> = top_down
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::ClosePr)
            .filter_map(|s| s.pr_number)
            .collect();
        assert_eq!(closes, vec![1, 2, 3]);

        let consolidate = engine.plan_merge(Some("c"), MergeStrategy::Consolidate, None).await?;
        assert!(consolidate.steps.iter().any(|s| s.kind == StepKind::CreatePr));
        let closes: Vec<u64> = consolidate
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::ClosePr)
            .filter_map(|s| s.pr_number)
            .collect();
        // The target's own PR is merged, not closed
        assert_eq!(closes, vec![1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn scope_chains_must_be_downstack_closed() -> Result<()> {
        let (dir, _repo, _ctx) = stacked_fixture().await?;
        // Tag a and c but not b
        let gateway = crate::git_gateway::GitGateway::from_path(dir.path())?;
        let store = crate::metadata::MetadataStore::from_gateway(gateway);
        for branch in ["a", "c"] {
            let mut meta: BranchMetadata = store.read(branch)?;
            meta.scope = Some("payments".to_string());
            store.write(branch, &meta)?;
        }

        let engine = load_engine_with(Box::new(MockHost::new())).await?;
        let err = engine
            .plan_merge(None, MergeStrategy::BottomUp, Some("payments"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("skips"), "got: {:#}", err);
        Ok(())
    }

    #[tokio::test]
    async fn executing_bottom_up_merges_and_deletes_locally() -> Result<()> {
        let (_dir, _repo, _ctx) = stacked_fixture().await?;
        let host = MockHost::new();
        host.open_pr("a", 1, "main");
        host.open_pr("b", 2, "a");
        host.open_pr("c", 3, "b");
        for branch in ["a", "b", "c"] {
            host.set_checks(branch, passing_checks());
        }

        let mut engine = load_engine_with(Box::new(host)).await?;
        let plan = engine.plan_merge(Some("c"), MergeStrategy::BottomUp, None).await?;
        assert!(plan.validation.valid, "errors: {:?}", plan.validation.errors);

        engine.execute_merge_plan(&plan, MergeMethod::Squash, false).await?;

        for branch in ["a", "b", "c"] {
            assert!(!engine.gateway().branch_exists(branch)?, "{} should be gone", branch);
            assert!(engine.store().read(branch)?.is_empty());
        }
        Ok(())
    }
}
