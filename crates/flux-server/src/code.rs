//! Read-only browsing of the working tree the change engine edits.
//!
//! `GET /api/code/tree` lists tracked-looking files and
//! `GET /api/code/file?path=` returns one file's text. Paths are confined to
//! the repository root after symlinks are resolved, and protected locations
//! are never served.

use std::io;
use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use flux_selfmod::SelfModError;
use flux_selfmod::context::list_files;
use flux_selfmod::validation::{MAX_CONTENT_BYTES, clean_path, escapes_root, is_protected};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::AppState;

/// Failures of the code-browsing endpoints.
#[derive(Debug, Error)]
pub enum CodeError {
    /// No change engine, so no working tree.
    #[error("repo path not configured")]
    NotConfigured,

    /// `path` query parameter absent or empty.
    #[error("path parameter is required")]
    MissingPath,

    /// Path leaves the repository root.
    #[error("path traversal not allowed")]
    PathTraversal,

    /// Protected location or `.git`.
    #[error("path is protected: {0}")]
    Protected(String),

    /// Missing file, or a directory.
    #[error("file not found")]
    NotFound,

    /// File over the content ceiling.
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// File size in bytes.
        size: u64,
        /// Ceiling in bytes.
        limit: u64,
    },

    /// Tree walk failed.
    #[error("failed to list files: {0}")]
    List(#[from] SelfModError),

    /// Blocking listing task panicked or was cancelled.
    #[error("listing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Other filesystem failure.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for CodeError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

impl CodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured | Self::MissingPath => StatusCode::BAD_REQUEST,
            Self::PathTraversal | Self::Protected(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::List(_) | Self::Task(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::MissingPath => "missing_path",
            Self::PathTraversal => "path_traversal",
            Self::Protected(_) => "protected_path",
            Self::NotFound => "not_found",
            Self::TooLarge { .. } => "file_too_large",
            Self::List(_) | Self::Task(_) => "list_failed",
            Self::Io(_) => "io_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for CodeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self, "code browsing failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// Body of `GET /api/code/tree`.
#[derive(Debug, Serialize)]
pub struct TreeResponse {
    /// Sorted relative paths.
    pub files: Vec<String>,
}

/// Query of `GET /api/code/file`.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    /// Path relative to the repository root.
    pub path: Option<String>,
}

/// Body of `GET /api/code/file`.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    /// Cleaned relative path.
    pub path: String,
    /// File text, lossily decoded.
    pub content: String,
}

fn repo_root(state: &AppState) -> Result<PathBuf, CodeError> {
    state
        .engine
        .as_ref()
        .map(|engine| engine.repo_path().to_path_buf())
        .ok_or(CodeError::NotConfigured)
}

/// `GET /api/code/tree`
pub async fn tree_handler(State(state): State<AppState>) -> Result<Json<TreeResponse>, CodeError> {
    let root = repo_root(&state)?;
    let files = tokio::task::spawn_blocking(move || list_files(&root)).await??;
    debug!(count = files.len(), "listed working tree");
    Ok(Json(TreeResponse { files }))
}

/// `GET /api/code/file?path=`
pub async fn file_handler(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> Result<Json<FileResponse>, CodeError> {
    let root = repo_root(&state)?;
    let requested = query
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or(CodeError::MissingPath)?;
    let (cleaned, full) = resolve(&root, &requested).await?;

    let meta = tokio::fs::metadata(&full).await?;
    if !meta.is_file() {
        return Err(CodeError::NotFound);
    }
    let limit = u64::try_from(MAX_CONTENT_BYTES).unwrap_or(u64::MAX);
    if meta.len() > limit {
        return Err(CodeError::TooLarge {
            size: meta.len(),
            limit,
        });
    }

    let bytes = tokio::fs::read(&full).await?;
    Ok(Json(FileResponse {
        path: cleaned,
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

/// Clean `requested`, reject escapes and protected locations, then confirm
/// the resolved file still sits inside the canonical root.
async fn resolve(root: &Path, requested: &str) -> Result<(String, PathBuf), CodeError> {
    let cleaned = clean_path(requested);
    if cleaned.is_empty() {
        return Err(CodeError::MissingPath);
    }
    if escapes_root(&cleaned) {
        return Err(CodeError::PathTraversal);
    }
    if is_protected(&cleaned) || cleaned.split('/').any(|segment| segment == ".git") {
        return Err(CodeError::Protected(cleaned));
    }

    let canonical_root = tokio::fs::canonicalize(root).await?;
    let canonical = tokio::fs::canonicalize(root.join(&cleaned)).await?;
    if !canonical.starts_with(&canonical_root) {
        warn!(path = %cleaned, "symlink points outside the repository");
        return Err(CodeError::PathTraversal);
    }
    Ok((cleaned, canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use flux_llm::ProviderRegistry;
    use flux_selfmod::{ChangeEngine, EngineConfig};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::server::{FluxServer, ServerDeps};

    fn app(repo: Option<&Path>) -> Router {
        let deps = ServerDeps {
            providers: ProviderRegistry::new(),
            default_provider: "anthropic".into(),
            engine: repo.map(|dir| Arc::new(ChangeEngine::new(EngineConfig::new(dir)))),
            publish_target: None,
            metrics: None,
        };
        FluxServer::new(ServerConfig::default(), deps).router()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 4_000_000)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn tree_lists_files() {
        let dir = repo();
        let (status, body) = get_json(app(Some(dir.path())), "/api/code/tree").await;
        assert_eq!(status, StatusCode::OK);
        let files: Vec<&str> = body["files"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f.as_str())
            .collect();
        assert!(files.contains(&"src/main.rs"));
        assert!(files.contains(&"README.md"));
    }

    #[tokio::test]
    async fn endpoints_require_a_repository() {
        let (status, body) = get_json(app(None), "/api/code/tree").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "not_configured");
        assert_eq!(body["error"], "repo path not configured");

        let (status, _) = get_json(app(None), "/api/code/file?path=README.md").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn file_returns_content() {
        let dir = repo();
        let (status, body) = get_json(app(Some(dir.path())), "/api/code/file?path=./src/main.rs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["path"], "src/main.rs");
        assert_eq!(body["content"], "fn main() {}\n");
    }

    #[tokio::test]
    async fn file_requires_path() {
        let dir = repo();
        let (status, body) = get_json(app(Some(dir.path())), "/api/code/file").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_path");
    }

    #[tokio::test]
    async fn traversal_is_forbidden() {
        let dir = repo();
        for uri in [
            "/api/code/file?path=../outside.txt",
            "/api/code/file?path=src/../../outside.txt",
            "/api/code/file?path=/etc/passwd",
        ] {
            let (status, body) = get_json(app(Some(dir.path())), uri).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(body["error"], "path traversal not allowed");
        }
    }

    #[tokio::test]
    async fn protected_files_are_not_served() {
        let dir = repo();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "[core]\n").unwrap();
        for uri in ["/api/code/file?path=.env", "/api/code/file?path=.git/config"] {
            let (status, body) = get_json(app(Some(dir.path())), uri).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
            assert_eq!(body["code"], "protected_path");
        }
    }

    #[tokio::test]
    async fn missing_file_and_directory_are_not_found() {
        let dir = repo();
        for uri in ["/api/code/file?path=nope.rs", "/api/code/file?path=src"] {
            let (status, body) = get_json(app(Some(dir.path())), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["code"], "not_found");
        }
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let dir = repo();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(MAX_CONTENT_BYTES + 1)).unwrap();
        let (status, body) = get_json(app(Some(dir.path())), "/api/code/file?path=big.txt").await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "file_too_large");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_tree_is_forbidden() {
        let dir = repo();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();
        let (status, body) = get_json(app(Some(dir.path())), "/api/code/file?path=link.txt").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "path_traversal");
    }
}
