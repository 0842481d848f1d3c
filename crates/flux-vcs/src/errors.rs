//! Version control error types.

use thiserror::Error;

/// Errors from git commands and the hosting API.
#[derive(Debug, Error)]
pub enum VcsError {
    /// `git` could not be started.
    #[error("failed to run git {command}: {source}")]
    Spawn {
        /// Subcommand, e.g. `push`.
        command: String,
        /// Process error.
        source: std::io::Error,
    },

    /// `git` exited unsuccessfully.
    #[error("git {command} failed (exit {code:?}): {stderr}")]
    CommandFailed {
        /// Subcommand, e.g. `push`.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured stderr with credentials redacted.
        stderr: String,
    },

    /// `git` did not finish within its time budget.
    #[error("git {command} timed out after {secs}s")]
    Timeout {
        /// Subcommand, e.g. `push`.
        command: String,
        /// Budget in seconds.
        secs: u64,
    },

    /// Filesystem error while preparing the working tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No working tree exists and there is nothing to clone it from.
    #[error("no repository at {path} and no remote configured")]
    NoRepository {
        /// Expected working tree location.
        path: String,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The hosting API answered with an error status.
    #[error("GitHub API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Message from the response body.
        message: String,
    },

    /// The hosting API answered successfully but without the expected data.
    #[error("unexpected GitHub response: {0}")]
    InvalidResponse(String),
}

/// Result type for version control operations.
pub type Result<T> = std::result::Result<T, VcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display() {
        let err = VcsError::CommandFailed {
            command: "push".into(),
            code: Some(128),
            stderr: "fatal: no remote".into(),
        };
        assert_eq!(err.to_string(), "git push failed (exit Some(128)): fatal: no remote");
    }

    #[test]
    fn api_display() {
        let err = VcsError::Api {
            status: 422,
            message: "Validation Failed".into(),
        };
        assert_eq!(err.to_string(), "GitHub API error (422): Validation Failed");
    }
}
