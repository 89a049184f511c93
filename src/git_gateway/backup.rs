//! Pre-operation branch snapshots for undo.
//!
//! Before a restack, move, reorder or sync-restack touches a branch, its tip
//! is recorded under `refs/strata/backup/<branch>-<nanos>-<counter>`. The
//! nanosecond timestamp plus an atomic counter keeps names unique even when
//! backups land within the same clock tick.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};

use crate::git_backend::Oid;

use super::GitGateway;

const BACKUP_PREFIX: &str = "refs/strata/backup/";

static BACKUP_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone)]
#[allow(dead_code)] // branch and timestamp feed the undo listing
pub struct BackupRef {
    pub ref_name: String,
    pub branch: String,
    /// Seconds since the epoch, for display and pruning order.
    pub timestamp: u64,
    pub tip: Oid,
}

impl GitGateway {
    pub fn create_backup(&self, branch: &str) -> Result<BackupRef> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let nanos = now.as_nanos() as u64;
        let counter = BACKUP_COUNTER.fetch_add(1, Ordering::SeqCst);

        let ref_name = format!("{}{}-{}-{}", BACKUP_PREFIX, branch, nanos, counter);
        let tip = self
            .resolve(branch)
            .with_context(|| format!("branch '{}' not found", branch))?;

        let when = Local
            .timestamp_opt(now.as_secs() as i64, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        self.backend()
            .create_reference(&ref_name, &tip, false, &format!("strata: backup of {} at {}", branch, when))?;

        Ok(BackupRef {
            ref_name,
            branch: branch.to_string(),
            timestamp: now.as_secs(),
            tip,
        })
    }

    /// Backups for one branch, newest first.
    pub fn list_backups(&self, branch: &str) -> Result<Vec<BackupRef>> {
        let pattern = format!("{}{}-*", BACKUP_PREFIX, branch);
        let mut found: Vec<(u64, u32, BackupRef)> = Vec::new();
        for (ref_name, tip) in self.backend().list_references(&pattern)? {
            let Some(rest) = ref_name.strip_prefix(BACKUP_PREFIX) else {
                continue;
            };
            // <branch>-<nanos>-<counter>; branch names may contain dashes, so
            // parse from the right.
            let mut parts = rest.rsplitn(3, '-');
            let counter: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let nanos: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let name = parts.next().unwrap_or_default();
            if name != branch {
                continue;
            }
            found.push((
                nanos,
                counter,
                BackupRef {
                    ref_name,
                    branch: branch.to_string(),
                    timestamp: nanos / 1_000_000_000,
                    tip,
                },
            ));
        }
        found.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(found.into_iter().map(|(_, _, backup)| backup).collect())
    }

    /// Delete backups beyond the configured undo depth, oldest first.
    pub fn prune_backups(&self, branch: &str, keep: usize) -> Result<usize> {
        let backups = self.list_backups(branch)?;
        let mut pruned = 0;
        for stale in backups.iter().skip(keep) {
            self.backend().delete_reference(&stale.ref_name)?;
            pruned += 1;
        }
        Ok(pruned)
    }
}
