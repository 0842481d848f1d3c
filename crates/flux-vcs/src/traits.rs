//! Capability traits consumed by the publish flow.

use async_trait::async_trait;

use crate::errors::Result;

/// Working tree and branch operations.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Open the working tree, cloning it first if it does not exist.
    async fn clone_or_open(&self) -> Result<()>;

    /// Create `name` from the current HEAD and check it out.
    async fn create_branch(&self, name: &str) -> Result<()>;

    /// Stage every change and commit. Returns the new commit hash.
    async fn commit_all(&self, message: &str) -> Result<String>;

    /// Push `branch` to the remote under the same name.
    async fn push(&self, branch: &str) -> Result<()>;

    /// Return to the default branch.
    async fn checkout_default(&self) -> Result<()>;
}

/// Pull request creation on the hosting service.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Open a pull request from `head` into `base`. Returns its web URL.
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String>;
}
