//! Resumable operation state and the process-level operation lock.
//!
//! Conflict-interruptible operations checkpoint to
//! `.git/strata/operation_state.json` before every rebase so `sta continue`
//! and `sta abort` work across process restarts. The lock file
//! (`.git/strata/operation.lock`) keeps two strata processes from mutating
//! the same repository at once; locks from crashed processes are detected by
//! PID and age and cleaned up.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::program_name::program_name;

/// A dead holder's lock must also be at least this old before cleanup, to
/// avoid racing a freshly started process.
const STALE_LOCK_AGE_SECS: u64 = 300;

fn strata_dir(git_dir: &Path) -> PathBuf {
    git_dir.join("strata")
}

// ───────────────────────── operation lock ─────────────────────────

#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Acquire the exclusive lock, cleaning up stale locks from crashed
    /// processes. Fails fast when another live process holds it.
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let dir = strata_dir(git_dir);
        fs::create_dir_all(&dir)?;
        let lock_path = dir.join("operation.lock");

        match Self::try_acquire(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(first_error) => {
                if Self::is_stale(&lock_path)? {
                    eprintln!("Cleaning up stale lock from a crashed process...");
                    let _ = fs::remove_file(&lock_path);
                    Self::try_acquire(&lock_path)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    fn try_acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(lock_path)
            .with_context(|| format!("failed to create lock file at {:?}", lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut writer = file.try_clone()?;
                let now = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(writer, "{}:{}", std::process::id(), now)?;
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(_) => {
                let holder = fs::read_to_string(lock_path).unwrap_or_default();
                let pid = holder.split(':').next().unwrap_or("").trim();
                bail!(
                    "another {} operation is in progress{}.\n\
                     If that process crashed, remove the lock: rm {:?}",
                    program_name(),
                    if pid.is_empty() {
                        String::new()
                    } else {
                        format!(" (pid {})", pid)
                    },
                    lock_path
                );
            }
        }
    }

    fn is_stale(lock_path: &Path) -> Result<bool> {
        if !lock_path.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(lock_path).unwrap_or_default();
        let mut parts = content.trim().split(':');
        let pid: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let stamped: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

        if pid == 0 || process_alive(pid) {
            return Ok(false);
        }
        if stamped > 0 {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now.saturating_sub(stamped) < STALE_LOCK_AGE_SECS {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No cheap probe off unix; err on the side of keeping the lock.
    true
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

// ───────────────────────── operation state ─────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Restack,
    Sync,
    Move,
    Reorder,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restack => write!(f, "restack"),
            Self::Sync => write!(f, "sync"),
            Self::Move => write!(f, "move"),
            Self::Reorder => write!(f, "reorder"),
        }
    }
}

/// Checkpointed progress of an interruptible operation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OperationState {
    pub kind: OperationKind,
    pub in_progress: bool,
    /// Branch whose rebase is running or stopped on conflicts.
    pub current_branch: Option<String>,
    pub remaining_branches: Vec<String>,
    #[serde(default)]
    pub completed_branches: Vec<String>,
    /// Where to return the checkout when the operation finishes.
    pub original_branch: String,
    /// Per-branch old-base overrides for fork-point rebases (reorder and
    /// move schedule these against pre-operation parent revisions).
    #[serde(default)]
    pub base_overrides: HashMap<String, String>,
}

impl OperationState {
    pub fn new(kind: OperationKind, original_branch: String, branches: Vec<String>) -> Self {
        Self {
            kind,
            in_progress: true,
            current_branch: None,
            remaining_branches: branches,
            completed_branches: Vec::new(),
            original_branch,
            base_overrides: HashMap::new(),
        }
    }

    fn state_path(git_dir: &Path) -> PathBuf {
        strata_dir(git_dir).join("operation_state.json")
    }

    pub fn load(git_dir: &Path) -> Result<Option<Self>> {
        let path = Self::state_path(git_dir);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {:?}", path))?;
        let state: OperationState = serde_json::from_str(&raw).with_context(|| {
            format!(
                "operation state is corrupted; to recover, delete it:\n  rm {:?}",
                path
            )
        })?;
        Ok(if state.in_progress { Some(state) } else { None })
    }

    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let dir = strata_dir(git_dir);
        fs::create_dir_all(&dir)?;
        let path = Self::state_path(git_dir);
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw).with_context(|| format!("failed to write {:?}", path))?;
        Ok(())
    }

    pub fn clear(git_dir: &Path) -> Result<()> {
        let path = Self::state_path(git_dir);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
