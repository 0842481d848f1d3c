//! # flux-vcs
//!
//! Remote publishing collaborators for approved change requests.
//!
//! - [`VersionControl`] / [`GitRepository`]: branch, commit and push through
//!   the `git` CLI
//! - [`PullRequestHost`] / [`GitHubClient`]: pull request creation over the
//!   GitHub REST API

#![deny(unsafe_code)]

pub mod errors;
pub mod git;
pub mod github;
pub mod traits;

pub use errors::{Result, VcsError};
pub use git::{GitConfig, GitRepository};
pub use github::{GitHubClient, GitHubConfig};
pub use traits::{PullRequestHost, VersionControl};
