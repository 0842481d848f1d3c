//! Change engine error types.

use flux_llm::ProviderError;
use thiserror::Error;

use crate::types::ChangeStatus;

/// Errors raised while generating, approving, rejecting or applying changes.
#[derive(Debug, Error)]
pub enum SelfModError {
    /// The model's reply was not a usable proposal.
    #[error("could not parse model response: {reason} (response: {sample})")]
    ResponseFormat {
        /// Parser diagnosis.
        reason: String,
        /// Leading part of the raw reply.
        sample: String,
    },

    /// The path is, or lives under, a protected location.
    #[error("cannot modify protected path: {path}")]
    ProtectedPath {
        /// Path as proposed.
        path: String,
    },

    /// The path escapes the working tree.
    #[error("path traversal not allowed: {path}")]
    PathTraversal {
        /// Path as proposed.
        path: String,
    },

    /// The path is empty after cleaning.
    #[error("invalid path: {path:?}")]
    InvalidPath {
        /// Path as proposed.
        path: String,
    },

    /// `action` is not `create`, `modify` or `delete`.
    #[error("invalid action {action:?} for {path}")]
    InvalidAction {
        /// Path as proposed.
        path: String,
        /// Action as proposed.
        action: String,
    },

    /// New content exceeds the size ceiling.
    #[error("file too large: {path} ({size} bytes, limit {limit})")]
    PayloadTooLarge {
        /// Path as proposed.
        path: String,
        /// Content length in bytes.
        size: usize,
        /// Ceiling in bytes.
        limit: usize,
    },

    /// A create or modify came without content.
    #[error("missing new_content for {action} of {path}")]
    MissingContent {
        /// Path as proposed.
        path: String,
        /// `create` or `modify`.
        action: &'static str,
    },

    /// The request is not in a state that allows the operation.
    #[error("change request {id} is {status}, not pending")]
    InvalidState {
        /// Request identifier.
        id: String,
        /// Current status.
        status: ChangeStatus,
    },

    /// No request with this identifier.
    #[error("change request {id:?} not found")]
    NotFound {
        /// Request identifier.
        id: String,
    },

    /// Writing or deleting a file failed; earlier changes stay applied.
    #[error("failed to apply change to {path}: {source}")]
    Apply {
        /// Path being written.
        path: String,
        /// Filesystem error.
        source: std::io::Error,
    },

    /// Reading the current content for a diff failed.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path being read.
        path: String,
        /// Filesystem error.
        source: std::io::Error,
    },

    /// The working tree could not be listed.
    #[error("failed to scan working tree: {0}")]
    TreeScan(#[from] walkdir::Error),

    /// The blocking tree scan task panicked or was cancelled.
    #[error("working tree scan task failed: {0}")]
    ScanTask(#[from] tokio::task::JoinError),

    /// The model call failed.
    #[error("model request failed: {0}")]
    Provider(#[from] ProviderError),

    /// The model call exceeded its time budget.
    #[error("model request timed out after {secs}s")]
    Timeout {
        /// Budget in seconds.
        secs: u64,
    },

    /// The caller cancelled generation.
    #[error("generation cancelled")]
    Cancelled,
}

impl SelfModError {
    /// Stable machine-readable code for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResponseFormat { .. } => "response_format",
            Self::ProtectedPath { .. } => "protected_path",
            Self::PathTraversal { .. } => "path_traversal",
            Self::InvalidPath { .. } => "invalid_path",
            Self::InvalidAction { .. } => "invalid_action",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::MissingContent { .. } => "missing_content",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound { .. } => "not_found",
            Self::Apply { .. } => "apply_error",
            Self::Read { .. } => "read_error",
            Self::TreeScan(_) | Self::ScanTask(_) => "tree_scan",
            Self::Provider(_) => "provider_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this is a proposal validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ProtectedPath { .. }
                | Self::PathTraversal { .. }
                | Self::InvalidPath { .. }
                | Self::InvalidAction { .. }
                | Self::PayloadTooLarge { .. }
                | Self::MissingContent { .. }
        )
    }
}

/// Result type for change engine operations.
pub type Result<T> = std::result::Result<T, SelfModError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        let err = SelfModError::InvalidState {
            id: "r1".into(),
            status: ChangeStatus::Approved,
        };
        assert_eq!(err.to_string(), "change request r1 is approved, not pending");
        assert_eq!(err.code(), "invalid_state");
        assert!(!err.is_validation());
    }

    #[test]
    fn validation_errors_flagged() {
        let err = SelfModError::ProtectedPath {
            path: "Dockerfile".into(),
        };
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "cannot modify protected path: Dockerfile");
    }

    #[test]
    fn provider_error_converts() {
        let err: SelfModError = ProviderError::Cancelled.into();
        assert_eq!(err.code(), "provider_error");
    }
}
