//! Layered configuration.
//!
//! Three TOML sources, highest priority first:
//! 1. Local override: `.git/strata/config.toml` (per-repo, per-user)
//! 2. User global: `~/.config/strata/config.toml`
//! 3. Repo shared: `.strata/config.toml` (committed, team-wide)
//!
//! The trunk lives in the repo layer so the whole team agrees on it; the
//! local layer can override it for forks with unusual setups.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_remote() -> String {
    "origin".to_string()
}

fn default_undo_depth() -> usize {
    10
}

/// Repo-shared configuration (`.strata/config.toml`, committed).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoConfig {
    /// The trunk branch. Inferred at engine load when absent.
    #[serde(default)]
    pub trunk: Option<String>,
    /// Remote used for push/fetch/PR operations.
    #[serde(default = "default_remote")]
    pub remote: String,
}

/// User-level configuration (`~/.config/strata/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    /// How many backup refs to keep per branch.
    #[serde(default)]
    pub undo_stack_depth: Option<usize>,
}

/// Local override (`.git/strata/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalConfig {
    #[serde(default)]
    pub trunk: Option<String>,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub undo_stack_depth: Option<usize>,
}

/// Merged view of all layers.
#[derive(Debug, Clone)]
pub struct Config {
    pub trunk: Option<String>,
    pub remote: String,
    pub undo_stack_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trunk: None,
            remote: default_remote(),
            undo_stack_depth: default_undo_depth(),
        }
    }
}

impl Config {
    /// Load and merge all layers for the repository rooted at `repo_root`.
    ///
    /// Missing files merge as empty layers; a file that exists but fails to
    /// parse is an error (silent misconfiguration is worse than failing).
    pub fn load(repo_root: &Path) -> Result<Self> {
        let repo: RepoConfig = read_layer(&repo_root.join(".strata").join("config.toml"))?.unwrap_or_default();
        let user: UserConfig = match user_config_path() {
            Some(path) => read_layer(&path)?.unwrap_or_default(),
            None => UserConfig::default(),
        };
        let local: LocalConfig =
            read_layer(&repo_root.join(".git").join("strata").join("config.toml"))?.unwrap_or_default();

        Ok(Config {
            trunk: local.trunk.or(repo.trunk),
            remote: local.remote.unwrap_or(repo.remote),
            undo_stack_depth: local
                .undo_stack_depth
                .or(user.undo_stack_depth)
                .unwrap_or_else(default_undo_depth),
        })
    }

    /// Persist the trunk (and remote) to the committed repo layer.
    pub fn save_repo_layer(repo_root: &Path, trunk: &str, remote: &str) -> Result<PathBuf> {
        let dir = repo_root.join(".strata");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {:?}", dir))?;
        let path = dir.join("config.toml");
        let repo = RepoConfig {
            trunk: Some(trunk.to_string()),
            remote: remote.to_string(),
        };
        let rendered = toml::to_string_pretty(&repo)?;
        fs::write(&path, rendered).with_context(|| format!("failed to write {:?}", path))?;
        Ok(path)
    }
}

fn read_layer<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let parsed = toml::from_str(&raw).with_context(|| format!("invalid config at {:?}", path))?;
    Ok(Some(parsed))
}

fn user_config_path() -> Option<PathBuf> {
    // Skipped in test builds so developer-machine config never leaks into
    // fixture repositories.
    #[cfg(test)]
    {
        None
    }
    #[cfg(not(test))]
    {
        dirs::config_dir().map(|d| d.join("strata").join("config.toml"))
    }
}
