//! Error handling module for hostharden
//!
//! Provides the error taxonomy of the mutation protocol using thiserror.
//! Precondition and backup failures abort a run before any write. Validation,
//! apply and verify failures are normally reported as a
//! [`MutationOutcome`](crate::engine::MutationOutcome) after rollback; the
//! matching variants here exist for callers that need to escalate them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for hostharden
#[derive(Error, Debug)]
pub enum HardenError {
    /// Missing privilege, missing file, or other unmet requirement
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A required external binary is not installed
    #[error("Required tool not found: {0}")]
    ToolMissing(String),

    /// The effective value could not be determined from any source
    #[error("Could not resolve effective value of {key} in {path}: {reason}")]
    ResolutionAmbiguous {
        key: String,
        path: PathBuf,
        reason: String,
    },

    /// Snapshot could not be written or read back
    #[error("Backup of {path} failed: {reason}")]
    Backup { path: PathBuf, reason: String },

    /// Writing the edited config failed (the original was restored)
    #[error("Editing {path} failed: {reason}")]
    Edit { path: PathBuf, reason: String },

    /// Edited config failed its syntax check
    #[error("Validation error: {0}")]
    Validation(String),

    /// Service failed to restart or become active
    #[error("Apply error: {0}")]
    Apply(String),

    /// Restart succeeded but the desired value is not in effect
    #[error("Verify error: {0}")]
    Verify(String),

    /// Restoring the previous state failed; the host needs manual attention
    #[error("Rollback of {path} failed, manual intervention required: {reason}")]
    RollbackFailed { path: PathBuf, reason: String },

    /// External command ran but reported failure
    #[error("Command failed: {0}")]
    Command(String),

    /// Tool configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Illegal mutation stage transition
    #[error("Invalid stage transition: {0}")]
    Transition(String),

    /// Breach-password range lookup failed
    #[error("Breach lookup failed: {0}")]
    Breach(String),

    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for hostharden operations
pub type Result<T> = std::result::Result<T, HardenError>;

// Convenient error constructors
impl HardenError {
    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a missing-tool error
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Self::ToolMissing(tool.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an apply error
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a verify error
    pub fn verify(msg: impl Into<String>) -> Self {
        Self::Verify(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a stage transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Create a breach lookup error
    pub fn breach(msg: impl Into<String>) -> Self {
        Self::Breach(msg.into())
    }

    /// Create a backup error for `path`
    pub fn backup(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Backup {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an edit error for `path`
    pub fn edit(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Edit {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a rollback failure for `path`
    pub fn rollback_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RollbackFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that leave the host needing manual repair
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}
