//! Error taxonomy for strata.
//!
//! The gateway produces `GitError` values carrying the full subprocess
//! invocation context. Engine operations classify failures into `StackError`
//! variants; `anyhow` carries them (with added context) up to `main`, which
//! is the only place that maps errors to exit codes.

use std::time::Duration;

use thiserror::Error;

/// Failure of a git subprocess invocation.
///
/// Carries the command, its arguments, and the captured output so the user
/// (and the logs) see exactly what git said.
#[derive(Debug, Error)]
#[error("git {command} failed: {}", .stderr.trim())]
pub struct GitError {
    /// The git subcommand, e.g. "rebase"
    pub command: String,
    /// Full argument list passed to git
    pub args: Vec<String>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    #[source]
    pub kind: GitErrorKind,
}

#[derive(Debug, Error)]
pub enum GitErrorKind {
    #[error("exited with status {code:?}")]
    Exit { code: Option<i32> },
    #[error("could not spawn git")]
    Spawn(#[source] std::io::Error),
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl GitError {
    /// True when the process was killed by the per-call deadline.
    #[allow(dead_code)]
    pub fn is_deadline(&self) -> bool {
        matches!(self.kind, GitErrorKind::DeadlineExceeded(_))
    }
}

/// The error categories actions translate into exit codes.
#[derive(Debug, Error)]
pub enum StackError {
    /// Invalid arguments or an operation the stack model forbids
    /// (move onto a descendant, reorder that drops a branch, ...).
    #[error("{0}")]
    User(String),

    /// The repository is not in a state the operation requires
    /// (uncommitted changes, detached HEAD, ...).
    #[error("{0}")]
    Precondition(String),

    /// A git subprocess failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// A rebase or cherry-pick stopped on conflicts. Recoverable via
    /// `sta continue` / `sta abort`.
    #[error("rebase stopped with conflicts on '{branch}'")]
    Conflict { branch: String },

    /// `push --force-with-lease` was rejected because the remote moved.
    #[error("push rejected for '{branch}': remote has commits we have not seen")]
    StaleRemoteInfo { branch: String },

    /// The pull-request host reported a failure.
    #[error("host request failed: {0}")]
    Host(String),

    /// An invariant the engine relies on was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl StackError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::User(_) | StackError::Precondition(_) => 1,
            StackError::Conflict { .. } => 2,
            StackError::Host(_) => 3,
            StackError::Git(_) | StackError::StaleRemoteInfo { .. } => 4,
            StackError::Internal(_) => 5,
        }
    }
}

/// Map an error chain to a process exit code.
///
/// Walks the chain looking for a typed error; plain `anyhow` messages are
/// treated as user errors.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<StackError>() {
            return e.exit_code();
        }
        if cause.downcast_ref::<GitError>().is_some() {
            return 4;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_err() -> GitError {
        GitError {
            command: "rebase".to_string(),
            args: vec!["rebase".to_string(), "--onto".to_string(), "abc".to_string()],
            stdout: String::new(),
            stderr: "fatal: invalid upstream\n".to_string(),
            kind: GitErrorKind::Exit { code: Some(128) },
        }
    }

    #[test]
    fn git_error_display_includes_command_and_stderr() {
        let msg = git_err().to_string();
        assert!(msg.contains("rebase"), "got: {}", msg);
        assert!(msg.contains("invalid upstream"), "got: {}", msg);
    }

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(StackError::User("x".into()).exit_code(), 1);
        assert_eq!(StackError::Precondition("x".into()).exit_code(), 1);
        assert_eq!(StackError::Conflict { branch: "b".into() }.exit_code(), 2);
        assert_eq!(StackError::Host("x".into()).exit_code(), 3);
        assert_eq!(StackError::Git(git_err()).exit_code(), 4);
        assert_eq!(StackError::StaleRemoteInfo { branch: "b".into() }.exit_code(), 4);
        assert_eq!(StackError::Internal("x".into()).exit_code(), 5);
    }

    #[test]
    fn exit_code_walks_anyhow_chain() {
        let err = anyhow::Error::new(StackError::Conflict { branch: "b".into() }).context("while restacking");
        assert_eq!(exit_code(&err), 2);

        let err = anyhow::Error::new(git_err()).context("while fetching");
        assert_eq!(exit_code(&err), 4);

        let err = anyhow::anyhow!("plain message");
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn deadline_is_distinguishable() {
        let e = GitError {
            command: "fetch".to_string(),
            args: vec!["fetch".to_string()],
            stdout: String::new(),
            stderr: "partial output".to_string(),
            kind: GitErrorKind::DeadlineExceeded(Duration::from_secs(300)),
        };
        assert!(e.is_deadline());
        assert!(!git_err().is_deadline());
    }
}
