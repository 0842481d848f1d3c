//! Change request store and lifecycle.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use flux_core::{ChangeRequestId, FileDiff};
use flux_llm::{ChatProvider, ProviderError, collect_text};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::tree_summary;
use crate::diff::file_diff;
use crate::errors::{Result, SelfModError};
use crate::prompt::build_messages;
use crate::response::parse_proposal;
use crate::types::{ChangeAction, ChangeRequest, ChangeStatus, FileChange};
use crate::validation::validate_all;

/// Default budget for one model round trip.
pub const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Root of the working tree the engine reads and writes.
    pub repo_path: PathBuf,
    /// Budget for one model round trip.
    pub generate_timeout: Duration,
}

impl EngineConfig {
    /// Config with the default timeout.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            generate_timeout: DEFAULT_GENERATE_TIMEOUT,
        }
    }
}

/// Generates, stores and applies change requests for one working tree.
///
/// The live store holds each request's current status. History is an
/// append-only list of creation-time snapshots, so its entries stay
/// `pending` after approval or rejection.
pub struct ChangeEngine {
    repo_path: PathBuf,
    generate_timeout: Duration,
    requests: Mutex<HashMap<String, ChangeRequest>>,
    history: RwLock<Vec<ChangeRequest>>,
}

impl ChangeEngine {
    /// Create an engine over `config.repo_path`.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            repo_path: config.repo_path,
            generate_timeout: config.generate_timeout,
            requests: Mutex::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Working tree root.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Ask `provider` for a patch set implementing `request`.
    ///
    /// Nothing is stored unless every proposed change passes validation.
    #[instrument(skip_all, fields(provider = provider.id()))]
    pub async fn generate(
        &self,
        provider: &dyn ChatProvider,
        request: &str,
        cancel: CancellationToken,
    ) -> Result<ChangeRequest> {
        let result = match tokio::time::timeout(
            self.generate_timeout,
            self.generate_inner(provider, request, &cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SelfModError::Timeout {
                secs: self.generate_timeout.as_secs(),
            }),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(SelfModError::Cancelled) => "cancelled",
            Err(SelfModError::Timeout { .. }) => "timeout",
            Err(e) if e.is_validation() => "rejected",
            Err(_) => "error",
        };
        counter!("selfmod_generations_total", "outcome" => outcome).increment(1);
        match &result {
            Ok(req) => info!(request_id = %req.id, changes = req.changes.len(), "change request created"),
            Err(e) => warn!(error = %e, code = e.code(), "change generation failed"),
        }
        result
    }

    async fn generate_inner(
        &self,
        provider: &dyn ChatProvider,
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<ChangeRequest> {
        let root = self.repo_path.clone();
        let tree = tokio::task::spawn_blocking(move || tree_summary(&root)).await??;
        let messages = build_messages(&tree, request);

        let stream = provider
            .stream_chat(&messages, cancel.clone())
            .await
            .map_err(cancelled_or)?;
        let raw = collect_text(stream).await.map_err(cancelled_or)?;
        // A cancelled stream ends early without an error.
        if cancel.is_cancelled() {
            return Err(SelfModError::Cancelled);
        }
        debug!(response_len = raw.len(), "model response received");

        let proposal = parse_proposal(&raw)?;
        let changes = validate_all(proposal.changes)?;
        let diffs = self.render_diffs(&changes).await?;

        let change_request = ChangeRequest {
            id: ChangeRequestId::new(),
            description: proposal.description,
            changes,
            diffs,
            status: ChangeStatus::Pending,
            created_at: Utc::now(),
        };
        let _ = self
            .requests
            .lock()
            .insert(change_request.id.as_str().to_owned(), change_request.clone());
        self.history.write().push(change_request.clone());
        Ok(change_request)
    }

    async fn render_diffs(&self, changes: &[FileChange]) -> Result<Vec<FileDiff>> {
        let mut diffs = Vec::with_capacity(changes.len());
        for change in changes {
            let old = match change.action {
                ChangeAction::Create => String::new(),
                ChangeAction::Modify | ChangeAction::Delete => {
                    self.read_existing(&change.path).await?
                }
            };
            let new = change.new_content.as_deref().unwrap_or_default();
            diffs.push(FileDiff {
                path: change.path.clone(),
                diff: file_diff(change.action, &change.path, &old, new),
            });
        }
        Ok(diffs)
    }

    /// Current content, or `""` when the file does not exist.
    async fn read_existing(&self, rel: &str) -> Result<String> {
        match tokio::fs::read_to_string(self.repo_path.join(rel)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(SelfModError::Read {
                path: rel.to_owned(),
                source,
            }),
        }
    }

    /// Approve a pending request and write its changes to the working tree.
    ///
    /// The status flips before any file is touched, so a second approval
    /// fails even while the first is still writing. A failure part way
    /// through leaves earlier changes in place.
    #[instrument(skip(self))]
    pub async fn approve_and_apply(&self, id: &str) -> Result<ChangeRequest> {
        let approved = self.transition(id, ChangeStatus::Approved)?;
        for change in &approved.changes {
            self.apply_change(change).await?;
        }
        info!(request_id = id, changes = approved.changes.len(), "change request applied");
        Ok(approved)
    }

    /// Discard a pending request. The working tree is untouched.
    pub fn reject(&self, id: &str) -> Result<ChangeRequest> {
        let rejected = self.transition(id, ChangeStatus::Rejected)?;
        info!(request_id = id, "change request rejected");
        Ok(rejected)
    }

    /// Copy of the live request.
    pub fn get(&self, id: &str) -> Option<ChangeRequest> {
        self.requests.lock().get(id).cloned()
    }

    /// Creation-time snapshots in creation order.
    pub fn history(&self) -> Vec<ChangeRequest> {
        self.history.read().clone()
    }

    fn transition(&self, id: &str, to: ChangeStatus) -> Result<ChangeRequest> {
        let mut requests = self.requests.lock();
        let request = requests
            .get_mut(id)
            .ok_or_else(|| SelfModError::NotFound { id: id.to_owned() })?;
        if request.status != ChangeStatus::Pending {
            return Err(SelfModError::InvalidState {
                id: id.to_owned(),
                status: request.status,
            });
        }
        request.status = to;
        Ok(request.clone())
    }

    async fn apply_change(&self, change: &FileChange) -> Result<()> {
        let target = self.repo_path.join(&change.path);
        let apply_err = |source| SelfModError::Apply {
            path: change.path.clone(),
            source,
        };
        match change.action {
            ChangeAction::Create | ChangeAction::Modify => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(apply_err)?;
                }
                let content = change.new_content.as_deref().unwrap_or_default();
                tokio::fs::write(&target, content).await.map_err(apply_err)?;
            }
            ChangeAction::Delete => match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %change.path, "delete target already absent");
                }
                Err(e) => return Err(apply_err(e)),
            },
        }
        debug!(path = %change.path, action = change.action.as_str(), "change applied");
        Ok(())
    }
}

fn cancelled_or(err: ProviderError) -> SelfModError {
    match err {
        ProviderError::Cancelled => SelfModError::Cancelled,
        other => SelfModError::Provider(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use flux_llm::testing::ScriptedProvider;
    use std::fs;
    use std::sync::Arc;

    fn engine(dir: &Path) -> ChangeEngine {
        ChangeEngine::new(EngineConfig::new(dir))
    }

    fn reply(changes: serde_json::Value) -> String {
        serde_json::json!({"description": "test change", "changes": changes}).to_string()
    }

    async fn generate_with(engine: &ChangeEngine, body: String) -> Result<ChangeRequest> {
        let provider = ScriptedProvider::new("fake", [body]);
        engine
            .generate(&provider, "do it", CancellationToken::new())
            .await
    }

    // ── generate ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_request_is_pending_with_diff() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let body = format!(
            "```json\n{}\n```",
            reply(serde_json::json!([
                {"path": "src/x.go", "action": "create", "new_content": "package x\n"}
            ]))
        );

        let req = generate_with(&engine, body).await.unwrap();
        assert_eq!(req.status, ChangeStatus::Pending);
        assert_eq!(req.description, "test change");
        assert_eq!(req.diffs.len(), 1);
        assert_eq!(req.diffs[0].path, "src/x.go");
        assert!(req.diffs[0].diff.starts_with("--- /dev/null\n+++ b/src/x.go\n"));
        assert!(req.diffs[0].diff.contains("+package x"));
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.get(req.id.as_str()).unwrap().status, ChangeStatus::Pending);
        // Nothing touches disk before approval.
        assert!(!dir.path().join("src/x.go").exists());
    }

    #[tokio::test]
    async fn modify_diffs_against_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        let engine = engine(dir.path());

        let req = generate_with(
            &engine,
            reply(serde_json::json!([
                {"path": "a.txt", "action": "modify", "new_content": "one\n2\n"}
            ])),
        )
        .await
        .unwrap();
        assert_eq!(
            req.diffs[0].diff,
            "--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+2\n"
        );
    }

    #[tokio::test]
    async fn protected_path_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let result = generate_with(
            &engine,
            reply(serde_json::json!([
                {"path": "src/ok.go", "action": "create", "new_content": "x"},
                {"path": "Dockerfile", "action": "modify", "new_content": "FROM scratch"}
            ])),
        )
        .await;
        assert_matches!(result, Err(SelfModError::ProtectedPath { path }) if path == "Dockerfile");
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn prose_reply_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let result = generate_with(&engine, "Sure! I'd love to help.".into()).await;
        assert_matches!(result, Err(SelfModError::ResponseFormat { .. }));
        assert!(engine.history().is_empty());
    }

    #[tokio::test]
    async fn prompt_includes_tree_and_request() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();
        let engine = engine(dir.path());
        let provider = ScriptedProvider::new(
            "fake",
            [reply(serde_json::json!([{"path": "b", "action": "create", "new_content": ""}]))],
        );

        engine
            .generate(&provider, "add b", CancellationToken::new())
            .await
            .unwrap();
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        let user = &calls[0][1].content;
        assert!(user.starts_with("Project structure:\nFile tree:\n  main.go\n"));
        assert!(user.ends_with("Request: add b"));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let provider = ScriptedProvider::failing("fake", "boom");
        let result = engine
            .generate(&provider, "x", CancellationToken::new())
            .await;
        assert_matches!(result, Err(SelfModError::Provider(_)));
    }

    #[tokio::test]
    async fn cancelled_generation_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let provider = ScriptedProvider::new("fake", ["{", "}"]).with_delay(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine.generate(&provider, "x", cancel).await;
        assert_matches!(result, Err(SelfModError::Cancelled));
        assert!(engine.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ChangeEngine::new(EngineConfig {
            repo_path: dir.path().to_path_buf(),
            generate_timeout: Duration::from_secs(1),
        });
        let provider = ScriptedProvider::new("fake", ["{}"]).with_delay(Duration::from_secs(10));
        let result = engine
            .generate(&provider, "x", CancellationToken::new())
            .await;
        assert_matches!(result, Err(SelfModError::Timeout { secs: 1 }));
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn approve_writes_files_and_is_single_shot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gone.txt"), "bye").unwrap();
        let engine = engine(dir.path());
        let req = generate_with(
            &engine,
            reply(serde_json::json!([
                {"path": "nested/dir/new.txt", "action": "create", "new_content": "hello"},
                {"path": "gone.txt", "action": "delete"},
                {"path": "never-existed.txt", "action": "delete"}
            ])),
        )
        .await
        .unwrap();

        let applied = engine.approve_and_apply(req.id.as_str()).await.unwrap();
        assert_eq!(applied.status, ChangeStatus::Approved);
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/dir/new.txt")).unwrap(),
            "hello"
        );
        assert!(!dir.path().join("gone.txt").exists());

        assert_matches!(
            engine.approve_and_apply(req.id.as_str()).await,
            Err(SelfModError::InvalidState { status: ChangeStatus::Approved, .. })
        );
        assert_matches!(
            engine.reject(req.id.as_str()),
            Err(SelfModError::InvalidState { .. })
        );
        // History keeps the creation-time snapshot.
        assert_eq!(engine.history()[0].status, ChangeStatus::Pending);
    }

    #[tokio::test]
    async fn reject_leaves_tree_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let req = generate_with(
            &engine,
            reply(serde_json::json!([
                {"path": "x.txt", "action": "create", "new_content": "x"}
            ])),
        )
        .await
        .unwrap();

        let rejected = engine.reject(req.id.as_str()).unwrap();
        assert_eq!(rejected.status, ChangeStatus::Rejected);
        assert!(!dir.path().join("x.txt").exists());
        assert_matches!(
            engine.approve_and_apply(req.id.as_str()).await,
            Err(SelfModError::InvalidState { status: ChangeStatus::Rejected, .. })
        );
    }

    #[tokio::test]
    async fn unknown_id_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        assert_matches!(
            engine.approve_and_apply("missing").await,
            Err(SelfModError::NotFound { .. })
        );
        assert_matches!(engine.reject("missing"), Err(SelfModError::NotFound { .. }));
        assert!(engine.get("missing").is_none());
    }

    #[tokio::test]
    async fn concurrent_approvals_apply_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(dir.path()));
        let req = generate_with(
            &engine,
            reply(serde_json::json!([
                {"path": "once.txt", "action": "create", "new_content": "1"}
            ])),
        )
        .await
        .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let id = req.id.as_str().to_owned();
                tokio::spawn(async move { engine.approve_and_apply(&id).await.is_ok() })
            })
            .collect();
        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn history_counts_successful_generations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let ok = reply(serde_json::json!([{"path": "a", "action": "create", "new_content": ""}]));
        let bad = reply(serde_json::json!([{"path": "../a", "action": "create", "new_content": ""}]));

        generate_with(&engine, ok.clone()).await.unwrap();
        assert!(generate_with(&engine, bad).await.is_err());
        generate_with(&engine, ok).await.unwrap();

        let history = engine.history();
        assert_eq!(history.len(), 2);
        assert_ne!(history[0].id, history[1].id);
    }
}
