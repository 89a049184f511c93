//! The in-memory branch DAG.
//!
//! A forest rooted at the trunk, built once per invocation from local
//! branches plus their metadata records. Nodes live in a name-indexed map
//! with parent/children stored as name handles, so demotion and removal are
//! plain map operations with no ownership cycles.
//!
//! Load never repairs anything on disk: branches with unknown parents or
//! cycle membership are left out of the graph (demoted) and reported; stale
//! parent revisions only set a flag.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use anyhow::Result;

use crate::errors::StackError;
use crate::git_backend::Oid;
use crate::git_gateway::GitGateway;
use crate::metadata::{BranchMetadata, MetadataStore};

/// Which neighbors of a branch a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackRange {
    pub recursive_parents: bool,
    pub recursive_children: bool,
    pub include_current: bool,
}

impl StackRange {
    pub const UPSTACK: StackRange = StackRange {
        recursive_parents: false,
        recursive_children: true,
        include_current: true,
    };
    pub const DOWNSTACK: StackRange = StackRange {
        recursive_parents: true,
        recursive_children: false,
        include_current: true,
    };
    #[allow(dead_code)]
    pub const FULL: StackRange = StackRange {
        recursive_parents: true,
        recursive_children: true,
        include_current: true,
    };
    pub const CURRENT_ONLY: StackRange = StackRange {
        recursive_parents: false,
        recursive_children: false,
        include_current: true,
    };
}

#[derive(Debug, Clone)]
pub struct BranchNode {
    pub tip: Oid,
    pub meta: BranchMetadata,
    /// `None` only for the trunk.
    pub parent: Option<String>,
    /// Sorted by name.
    pub children: Vec<String>,
    /// `parentBranchRevision` is recorded but no longer reachable from the
    /// tip (external rewrite). Load flags it; nothing auto-rebases.
    pub needs_restack: bool,
}

pub struct StackGraph {
    trunk: String,
    nodes: BTreeMap<String, BranchNode>,
    demoted: Vec<(String, String)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChainStatus {
    Ok,
    Demoted,
}

impl StackGraph {
    /// Build the graph: enumerate branches and metadata, batch-read both,
    /// link edges, demote what cannot be linked.
    pub async fn load(gateway: &GitGateway, store: &MetadataStore, trunk: &str) -> Result<Self> {
        let locals = gateway.local_branches()?;
        let tips: HashMap<String, Oid> = locals.into_iter().collect();

        let trunk_tip = tips
            .get(trunk)
            .ok_or_else(|| StackError::Precondition(format!("trunk '{}' does not exist", trunk)))?
            .clone();

        // Metadata for branches that still exist locally; stale records for
        // deleted branches stay on disk untouched.
        let names: Vec<String> = store
            .list()?
            .into_keys()
            .filter(|name| name != trunk && tips.contains_key(name))
            .collect();
        let (metas, read_failures) = store.read_batch(&names).await;

        let mut demoted: Vec<(String, String)> = read_failures
            .into_iter()
            .map(|(branch, err)| (branch, format!("unreadable metadata: {:#}", err)))
            .collect();

        // Candidates: records that actually name a parent.
        let mut candidates: BTreeMap<String, BranchMetadata> = BTreeMap::new();
        for (branch, meta) in metas {
            if meta.is_tracked() {
                candidates.insert(branch, meta);
            }
        }

        // Resolve every candidate's parent chain to the trunk. Memoized, so
        // the pass is linear; cycles and unknown parents demote the whole
        // dependent path.
        let mut status: HashMap<String, ChainStatus> = HashMap::new();
        let candidate_names: Vec<String> = candidates.keys().cloned().collect();
        for name in &candidate_names {
            if status.contains_key(name) {
                continue;
            }
            let mut path: Vec<String> = Vec::new();
            let mut path_set: HashSet<String> = HashSet::new();
            let mut cursor = name.clone();
            let outcome: (ChainStatus, Option<String>) = loop {
                if let Some(&resolved) = status.get(&cursor) {
                    break (resolved, Some("depends on an untracked branch".to_string()));
                }
                if path_set.contains(&cursor) {
                    break (ChainStatus::Demoted, Some("parent cycle detected".to_string()));
                }
                path.push(cursor.clone());
                path_set.insert(cursor.clone());

                let parent = candidates[&cursor]
                    .parent_branch_name
                    .clone()
                    .expect("candidates are tracked");
                if parent == trunk {
                    break (ChainStatus::Ok, None);
                }
                if !candidates.contains_key(&parent) {
                    break (
                        ChainStatus::Demoted,
                        Some(format!("parent '{}' is not a tracked branch", parent)),
                    );
                }
                cursor = parent;
            };
            let (resolved, reason) = outcome;
            for branch in path {
                status.insert(branch.clone(), resolved);
                if resolved == ChainStatus::Demoted {
                    demoted.push((
                        branch,
                        reason.clone().unwrap_or_else(|| "parent chain is broken".to_string()),
                    ));
                }
            }
        }

        // Assemble nodes for the trunk and every surviving branch.
        let mut nodes: BTreeMap<String, BranchNode> = BTreeMap::new();
        nodes.insert(
            trunk.to_string(),
            BranchNode {
                tip: trunk_tip,
                meta: BranchMetadata::empty(),
                parent: None,
                children: Vec::new(),
                needs_restack: false,
            },
        );

        for (branch, meta) in candidates {
            if status.get(&branch) != Some(&ChainStatus::Ok) {
                continue;
            }
            let tip = tips[&branch].clone();
            let needs_restack = match &meta.parent_branch_revision {
                Some(revision) => !gateway.is_ancestor(revision, tip.as_str()).unwrap_or(false),
                None => false,
            };
            let parent = meta.parent_branch_name.clone();
            nodes.insert(
                branch,
                BranchNode {
                    tip,
                    meta,
                    parent,
                    children: Vec::new(),
                    needs_restack,
                },
            );
        }

        // Child edges, name-sorted for deterministic traversal.
        let edges: Vec<(String, String)> = nodes
            .iter()
            .filter_map(|(name, node)| node.parent.clone().map(|parent| (parent, name.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        for node in nodes.values_mut() {
            node.children.sort();
        }

        demoted.sort();
        demoted.dedup();
        Ok(Self {
            trunk: trunk.to_string(),
            nodes,
            demoted,
        })
    }

    /// An empty graph for unit tests that build structure by hand.
    #[cfg(test)]
    pub(crate) fn for_tests(trunk: &str, trunk_tip: Oid) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            trunk.to_string(),
            BranchNode {
                tip: trunk_tip,
                meta: BranchMetadata::empty(),
                parent: None,
                children: Vec::new(),
                needs_restack: false,
            },
        );
        Self {
            trunk: trunk.to_string(),
            nodes,
            demoted: Vec::new(),
        }
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn demoted(&self) -> &[(String, String)] {
        &self.demoted
    }

    pub fn node(&self, name: &str) -> Option<&BranchNode> {
        self.nodes.get(name)
    }

    /// Tracked (non-trunk) branch names, sorted.
    pub fn tracked_branches(&self) -> Vec<String> {
        self.nodes.keys().filter(|name| **name != self.trunk).cloned().collect()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        name != self.trunk && self.nodes.contains_key(name)
    }

    pub fn is_trunk(&self, name: &str) -> bool {
        name == self.trunk
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|node| node.parent.as_deref())
    }

    pub fn children_of(&self, name: &str) -> Vec<String> {
        self.nodes.get(name).map(|node| node.children.clone()).unwrap_or_default()
    }

    fn require_known(&self, name: &str) -> Result<&BranchNode> {
        self.nodes.get(name).ok_or_else(|| {
            StackError::User(format!("branch '{}' is not tracked (and is not the trunk)", name)).into()
        })
    }

    /// Ancestors of `branch` below the trunk, ordered trunk-side first.
    /// Excludes both the trunk and the branch itself.
    pub fn ancestors(&self, branch: &str) -> Result<Vec<String>> {
        self.require_known(branch)?;
        let mut chain = Vec::new();
        let mut cursor = branch;
        while let Some(parent) = self.parent_of(cursor) {
            if parent == self.trunk {
                break;
            }
            chain.push(parent.to_string());
            cursor = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// All descendants of `branch` in DFS order, siblings by name.
    /// Excludes the branch itself.
    pub fn descendants(&self, branch: &str) -> Result<Vec<String>> {
        self.require_known(branch)?;
        let mut out = Vec::new();
        let mut stack: Vec<String> = self.children_of(branch);
        stack.reverse();
        while let Some(name) = stack.pop() {
            out.push(name.clone());
            let mut children = self.children_of(&name);
            children.reverse();
            stack.extend(children);
        }
        Ok(out)
    }

    /// Is `name` a strict descendant of `of`?
    pub fn is_descendant(&self, name: &str, of: &str) -> bool {
        let mut cursor = name;
        while let Some(parent) = self.parent_of(cursor) {
            if parent == of {
                return true;
            }
            cursor = parent;
        }
        false
    }

    /// Scope query: ancestors / self / descendants per the range flags.
    /// Ancestors come trunk-side first, then the branch, then descendants
    /// in BFS order (siblings by name).
    pub fn relative_stack(&self, branch: &str, range: StackRange) -> Result<Vec<String>> {
        self.require_known(branch)?;
        let mut out = Vec::new();

        if range.recursive_parents && !self.is_trunk(branch) {
            out.extend(self.ancestors(branch)?);
        }
        if range.include_current {
            out.push(branch.to_string());
        }
        if range.recursive_children {
            let mut queue: VecDeque<String> = self.children_of(branch).into();
            while let Some(name) = queue.pop_front() {
                out.push(name.clone());
                queue.extend(self.children_of(&name));
            }
        }
        Ok(out)
    }

    /// Ancestors up to the trunk plus the branch itself.
    pub fn full_stack(&self, branch: &str) -> Result<Vec<String>> {
        let mut out = self.ancestors(branch)?;
        out.push(branch.to_string());
        Ok(out)
    }

    /// Stable topological order: every parent precedes its children, sibling
    /// subtrees in name order. Names outside the graph keep out of the way
    /// at the end, sorted, so callers get a deterministic total order.
    pub fn sort_topologically(&self, branches: &[String]) -> Vec<String> {
        let requested: HashSet<&str> = branches.iter().map(String::as_str).collect();
        let mut out = Vec::with_capacity(branches.len());

        // DFS over the whole forest in child-name order
        let mut stack: Vec<String> = vec![self.trunk.clone()];
        while let Some(name) = stack.pop() {
            if requested.contains(name.as_str()) {
                out.push(name.clone());
            }
            let mut children = self.children_of(&name);
            children.reverse();
            stack.extend(children);
        }

        let mut unknown: Vec<String> = branches
            .iter()
            .filter(|name| !self.nodes.contains_key(*name))
            .cloned()
            .collect();
        unknown.sort();
        unknown.dedup();
        out.extend(unknown);
        out
    }

    // ── mutation hooks for engine operations ───────────────────────

    pub(crate) fn set_tip(&mut self, name: &str, tip: Oid) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.tip = tip;
        }
    }

    pub(crate) fn set_meta(&mut self, name: &str, meta: BranchMetadata) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.needs_restack = false;
            node.meta = meta;
        }
    }

    pub(crate) fn insert_tracked(&mut self, name: &str, tip: Oid, meta: BranchMetadata) {
        let parent = meta.parent_branch_name.clone().expect("tracked metadata has a parent");
        self.nodes.insert(
            name.to_string(),
            BranchNode {
                tip,
                meta,
                parent: Some(parent.clone()),
                children: Vec::new(),
                needs_restack: false,
            },
        );
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(name.to_string());
            parent_node.children.sort();
            parent_node.children.dedup();
        }
    }

    /// Rewire a branch under a new parent, updating both edge sets.
    pub(crate) fn set_parent(&mut self, name: &str, new_parent: &str) {
        let old_parent = match self.nodes.get_mut(name) {
            Some(node) => {
                let old = node.parent.replace(new_parent.to_string());
                node.meta.parent_branch_name = Some(new_parent.to_string());
                old
            }
            None => return,
        };
        if let Some(old_parent) = old_parent {
            if let Some(node) = self.nodes.get_mut(&old_parent) {
                node.children.retain(|child| child != name);
            }
        }
        if let Some(node) = self.nodes.get_mut(new_parent) {
            node.children.push(name.to_string());
            node.children.sort();
            node.children.dedup();
        }
    }

    /// Drop a branch from the graph. The caller is responsible for having
    /// rewired or removed its children first.
    pub(crate) fn remove(&mut self, name: &str) {
        if let Some(node) = self.nodes.remove(name) {
            if let Some(parent) = node.parent {
                if let Some(parent_node) = self.nodes.get_mut(&parent) {
                    parent_node.children.retain(|child| child != name);
                }
            }
        }
    }
}
