//! Publish sequence for an approved change request.
//!
//! With a remote configured the sequence is branch, apply, commit, push,
//! pull request, checkout default. Without one it only applies. A
//! `selfmod.status` report precedes each step, and the first failure stops
//! the sequence with an `error` report. Nothing is rolled back.

use std::fmt;
use std::sync::Arc;

use flux_core::{PublishStatus, SelfModStatus};
use flux_selfmod::{ChangeEngine, ChangeStatus, SelfModError};
use flux_vcs::{PullRequestHost, VcsError, VersionControl};
use metrics::counter;
use tracing::{info, instrument, warn};

use crate::metrics::SELFMOD_PUBLISH_TOTAL;

/// Remote collaborators used when publishing to a hosted repository.
#[derive(Clone)]
pub struct PublishTarget {
    /// Working tree operations.
    pub vcs: Arc<dyn VersionControl>,
    /// Pull request creation.
    pub host: Arc<dyn PullRequestHost>,
    /// Base branch for pull requests.
    pub default_branch: String,
}

/// Receives progress reports for one publish sequence.
pub trait StatusReporter: Send + Sync {
    /// Deliver one report. Delivery failures are the reporter's concern.
    fn report(&self, status: SelfModStatus);
}

/// Step at which a publish sequence stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishStep {
    /// Finding the request.
    Lookup,
    /// Creating the feature branch.
    Branch,
    /// Writing changes to the working tree.
    Apply,
    /// Committing.
    Commit,
    /// Pushing the branch.
    Push,
    /// Opening the pull request.
    PullRequest,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lookup => "lookup",
            Self::Branch => "branch",
            Self::Apply => "apply",
            Self::Commit => "commit",
            Self::Push => "push",
            Self::PullRequest => "pull_request",
        })
    }
}

/// Underlying cause of a publish failure.
#[derive(Debug, thiserror::Error)]
pub enum PublishFailure {
    /// Change engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] SelfModError),
    /// Git or hosting call failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// A publish sequence stopped at `step`.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct PublishError {
    /// Where it stopped.
    pub step: PublishStep,
    /// Why.
    #[source]
    pub source: PublishFailure,
}

impl PublishError {
    fn at(step: PublishStep, source: impl Into<PublishFailure>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// How a successful publish ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Pull request opened at this URL.
    PullRequest(String),
    /// Applied locally; no remote configured.
    Applied,
}

/// Drives approved change requests through the publish sequence.
pub struct PublishOrchestrator {
    engine: Arc<ChangeEngine>,
    target: Option<PublishTarget>,
}

impl PublishOrchestrator {
    /// Orchestrator that publishes to `target`, or only applies without one.
    pub fn new(engine: Arc<ChangeEngine>, target: Option<PublishTarget>) -> Self {
        Self { engine, target }
    }

    /// Whether a remote is configured.
    pub fn has_remote(&self) -> bool {
        self.target.is_some()
    }

    /// Run the sequence for `request_id`, reporting progress to `reporter`.
    ///
    /// The failure is reported as an `error` status before it is returned.
    #[instrument(skip_all, fields(request_id))]
    pub async fn publish(
        &self,
        request_id: &str,
        reporter: &dyn StatusReporter,
    ) -> Result<PublishOutcome, PublishError> {
        let _ = tracing::Span::current().record("request_id", request_id);
        let progress = Progress {
            request_id,
            reporter,
        };

        let result = self.run(&progress).await;
        let outcome = match &result {
            Ok(PublishOutcome::PullRequest(url)) => {
                info!(pr_url = %url, "change request published");
                "pr_created"
            }
            Ok(PublishOutcome::Applied) => {
                info!("change request applied locally");
                "applied"
            }
            Err(e) => {
                warn!(step = %e.step, error = %e.source, "publish failed");
                progress.send(PublishStatus::Error, Some(e.to_string()), None);
                "error"
            }
        };
        counter!(SELFMOD_PUBLISH_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn run(&self, progress: &Progress<'_>) -> Result<PublishOutcome, PublishError> {
        let id = progress.request_id;
        let request = self
            .engine
            .get(id)
            .ok_or_else(|| PublishError::at(PublishStep::Lookup, SelfModError::NotFound { id: id.to_owned() }))?;
        if request.status != ChangeStatus::Pending {
            return Err(PublishError::at(
                PublishStep::Lookup,
                SelfModError::InvalidState {
                    id: id.to_owned(),
                    status: request.status,
                },
            ));
        }

        let Some(target) = &self.target else {
            progress.send(PublishStatus::Applying, Some("applying changes".into()), None);
            let _ = self
                .engine
                .approve_and_apply(id)
                .await
                .map_err(|e| PublishError::at(PublishStep::Apply, e))?;
            progress.send(
                PublishStatus::Applied,
                Some("changes applied; no remote configured, so no pull request".into()),
                None,
            );
            return Ok(PublishOutcome::Applied);
        };

        let branch = format!("selfmod/{id}");
        progress.send(PublishStatus::Pushing, Some(format!("creating branch {branch}")), None);
        target
            .vcs
            .create_branch(&branch)
            .await
            .map_err(|e| PublishError::at(PublishStep::Branch, e))?;

        progress.send(PublishStatus::Applying, Some("applying changes".into()), None);
        let _ = self
            .engine
            .approve_and_apply(id)
            .await
            .map_err(|e| PublishError::at(PublishStep::Apply, e))?;

        progress.send(PublishStatus::Pushing, Some("committing and pushing".into()), None);
        let commit = target
            .vcs
            .commit_all(&format!("selfmod: {}", request.description))
            .await
            .map_err(|e| PublishError::at(PublishStep::Commit, e))?;
        info!(commit = %commit, branch = %branch, "committed change request");
        target
            .vcs
            .push(&branch)
            .await
            .map_err(|e| PublishError::at(PublishStep::Push, e))?;

        let url = target
            .host
            .create_pull_request(
                &format!("[selfmod] {}", request.description),
                &pull_request_body(&request.description),
                &branch,
                &target.default_branch,
            )
            .await
            .map_err(|e| PublishError::at(PublishStep::PullRequest, e))?;
        progress.send(
            PublishStatus::PrCreated,
            Some("pull request created".into()),
            Some(url.clone()),
        );

        if let Err(e) = target.vcs.checkout_default().await {
            warn!(error = %e, "failed to return to default branch");
        }
        Ok(PublishOutcome::PullRequest(url))
    }
}

fn pull_request_body(description: &str) -> String {
    format!(
        "## Self-Modification Request\n\n{description}\n\nGenerated by the Flux self-modification engine."
    )
}

struct Progress<'a> {
    request_id: &'a str,
    reporter: &'a dyn StatusReporter,
}

impl Progress<'_> {
    fn send(&self, status: PublishStatus, message: Option<String>, pr_url: Option<String>) {
        self.reporter.report(SelfModStatus {
            request_id: self.request_id.to_owned(),
            status,
            message,
            pr_url,
        });
    }
}
