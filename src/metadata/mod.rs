//! Metadata store: branch records as blobs under `refs/strata/metadata/`.
//!
//! Refs-pointing-at-blobs survive clones and pushes, unlike files in
//! `.git/`, and each write is a blob creation plus one atomic ref update.
//! The store exclusively owns this namespace; branch refs belong to git and
//! the user.

pub mod schema;

pub use schema::{BranchMetadata, PrInfo, PrState};

use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use crate::git_gateway::GitGateway;

pub(crate) const METADATA_REF_PREFIX: &str = "refs/strata/metadata/";

/// Fan-out bound for batch reads.
fn read_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

pub struct MetadataStore {
    gateway: GitGateway,
}

impl MetadataStore {
    /// Open a store for the repository in the current directory (or the
    /// test fixture, in test builds).
    pub fn open() -> Result<Self> {
        Ok(Self {
            gateway: GitGateway::open()?,
        })
    }

    pub fn from_gateway(gateway: GitGateway) -> Self {
        Self { gateway }
    }

    fn ref_name(branch: &str) -> String {
        format!("{}{}", METADATA_REF_PREFIX, branch)
    }

    /// Read a branch's metadata. An absent ref is the empty record, not an
    /// error; a present-but-unparsable blob is an error.
    pub fn read(&self, branch: &str) -> Result<BranchMetadata> {
        let ref_name = Self::ref_name(branch);
        match self.gateway.backend().find_reference(&ref_name)? {
            None => Ok(BranchMetadata::empty()),
            Some(blob_sha) => {
                let raw = self
                    .gateway
                    .backend()
                    .read_blob(&blob_sha)
                    .with_context(|| format!("failed to read metadata blob for '{}'", branch))?;
                BranchMetadata::parse(&raw).with_context(|| format!("corrupt metadata for branch '{}'", branch))
            }
        }
    }

    /// Overwrite a branch's metadata. Blob write plus `update-ref`; never
    /// partial.
    pub fn write(&self, branch: &str, meta: &BranchMetadata) -> Result<()> {
        let raw = meta.render()?;
        let blob_sha = self
            .gateway
            .backend()
            .create_blob(&raw)
            .with_context(|| format!("failed to write metadata blob for '{}'", branch))?;
        self.gateway
            .backend()
            .create_reference(
                &Self::ref_name(branch),
                &blob_sha,
                true,
                &format!("strata: metadata for {}", branch),
            )
            .with_context(|| format!("failed to update metadata ref for '{}'", branch))?;
        Ok(())
    }

    /// Delete a branch's metadata; absent refs are fine.
    pub fn delete(&self, branch: &str) -> Result<()> {
        self.gateway
            .backend()
            .delete_reference(&Self::ref_name(branch))
            .with_context(|| format!("failed to delete metadata for '{}'", branch))
    }

    /// All branches with metadata, as branch name → blob sha.
    pub fn list(&self) -> Result<HashMap<String, crate::git_backend::Oid>> {
        let pattern = format!("{}*", METADATA_REF_PREFIX);
        let mut out = HashMap::new();
        for (ref_name, blob_sha) in self.gateway.backend().list_references(&pattern)? {
            if let Some(branch) = ref_name.strip_prefix(METADATA_REF_PREFIX) {
                out.insert(branch.to_string(), blob_sha);
            }
        }
        Ok(out)
    }

    /// Batch read with bounded fan-out. Failures come back per-branch; one
    /// corrupt record never hides the others.
    pub async fn read_batch(
        &self,
        branches: &[String],
    ) -> (HashMap<String, BranchMetadata>, HashMap<String, anyhow::Error>) {
        let results: Vec<(String, Result<BranchMetadata>)> = stream::iter(branches.iter().cloned())
            .map(|branch| async move {
                let result = self.read(&branch);
                (branch, result)
            })
            .buffer_unordered(read_concurrency())
            .collect()
            .await;

        let mut ok = HashMap::new();
        let mut failed = HashMap::new();
        for (branch, result) in results {
            match result {
                Ok(meta) => {
                    ok.insert(branch, meta);
                }
                Err(err) => {
                    failed.insert(branch, err);
                }
            }
        }
        (ok, failed)
    }

    /// Atomic-enough rename: write under the new name, then delete the old.
    /// A crash in between leaves both records, which a later write repairs.
    #[allow(dead_code)] // used when a rename command lands
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let meta = self.read(old)?;
        if meta.is_empty() {
            return self.delete(old);
        }
        self.write(new, &meta)?;
        self.delete(old)
    }

    pub fn gateway(&self) -> &GitGateway {
        &self.gateway
    }
}
