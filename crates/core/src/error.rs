//! # Build Errors
//!
//! Typed error taxonomy for the orchestration core.
//!
//! Single-unit agents never surface these to their callers (they fold them
//! into failed results); the architecture phase and the builders do.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by an [`AgentInvoker`](crate::invoker::AgentInvoker) backend.
#[derive(Error, Debug)]
pub enum InvokerError {
    /// The backend cannot work for any unit (missing binary, bad setup).
    #[error("Agent backend unavailable: {0}")]
    Unavailable(String),

    /// The backend process could not be spawned or talked to.
    #[error("Agent process error: {0}")]
    Process(String),

    /// The agent reported an error on its event stream.
    #[error("Agent reported an error: {0}")]
    Reported(String),
}

impl InvokerError {
    /// Fatal errors will fail every sibling unit the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InvokerError::Unavailable(_))
    }
}

/// Errors surfaced by the orchestration core.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Repository path is missing or not a directory
    #[error("Invalid repository {path:?}: {reason}")]
    RepositoryValidation { path: PathBuf, reason: String },

    /// The architecture agent finished without writing its manifest
    #[error("Architecture manifest was not created{}", turn_limit_note(.hit_turn_limit, .turn_count, .max_turns))]
    ManifestNotProduced {
        turn_count: u32,
        max_turns: u32,
        hit_turn_limit: bool,
    },

    /// Underlying agent call failed
    #[error(transparent)]
    AgentInvocation(#[from] InvokerError),

    /// A unit, phase or build exceeded its wall-clock budget
    #[error("{scope} timed out after {seconds}s")]
    Timeout { scope: String, seconds: u64 },

    /// Invalid arguments or an illegal state transition
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn turn_limit_note(hit: &bool, turns: &u32, max: &u32) -> String {
    if *hit {
        format!(". Hit turn limit ({}/{})", turns, max)
    } else {
        String::new()
    }
}

impl BuildError {
    /// Repository path does not exist
    pub fn repo_not_found(path: &Path) -> Self {
        BuildError::RepositoryValidation {
            path: path.to_path_buf(),
            reason: "path does not exist".to_string(),
        }
    }

    /// Repository path exists but is not a directory
    pub fn repo_not_dir(path: &Path) -> Self {
        BuildError::RepositoryValidation {
            path: path.to_path_buf(),
            reason: "path is not a directory".to_string(),
        }
    }

    pub fn timeout(scope: impl Into<String>, seconds: u64) -> Self {
        BuildError::Timeout {
            scope: scope.into(),
            seconds,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BuildError::Config(msg.into())
    }

    /// True when the error will recur for every sibling unit.
    pub fn is_fatal(&self) -> bool {
        match self {
            BuildError::AgentInvocation(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result alias for the orchestration core
pub type Result<T> = std::result::Result<T, BuildError>;

/// Check that `path` exists and is a directory.
pub fn ensure_repository(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(BuildError::repo_not_found(path));
    }
    if !path.is_dir() {
        return Err(BuildError::repo_not_dir(path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_message() {
        let plain = BuildError::ManifestNotProduced {
            turn_count: 12,
            max_turns: 200,
            hit_turn_limit: false,
        };
        assert_eq!(plain.to_string(), "Architecture manifest was not created");

        let capped = BuildError::ManifestNotProduced {
            turn_count: 195,
            max_turns: 200,
            hit_turn_limit: true,
        };
        assert_eq!(
            capped.to_string(),
            "Architecture manifest was not created. Hit turn limit (195/200)"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let fatal: BuildError = InvokerError::Unavailable("claude not found".into()).into();
        let transient: BuildError = InvokerError::Process("exit 1".into()).into();
        assert!(fatal.is_fatal());
        assert!(!transient.is_fatal());
        assert!(!BuildError::timeout("unit", 5).is_fatal());
    }

    #[test]
    fn test_ensure_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_repository(dir.path()).is_ok());

        let missing = dir.path().join("nope");
        assert!(matches!(
            ensure_repository(&missing),
            Err(BuildError::RepositoryValidation { .. })
        ));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = ensure_repository(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
