//! GitHub REST client for opening pull requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::{Result, VcsError};
use crate::traits::PullRequestHost;

/// Public GitHub API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

/// Settings for [`GitHubClient`].
#[derive(Clone, Debug)]
pub struct GitHubConfig {
    /// API token.
    pub token: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// API root; [`DEFAULT_API_BASE`] in production.
    pub api_base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// Opens pull requests on one repository.
pub struct GitHubClient {
    config: GitHubConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    number: Option<u64>,
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

impl GitHubClient {
    /// Build a client with the configured timeout.
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert(USER_AGENT, HeaderValue::from_static("flux-agent"));
        let _ = headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn pulls_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/pulls",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        )
    }
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    #[instrument(skip(self, body), fields(owner = %self.config.owner, repo = %self.config.repo))]
    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.pulls_url())
            .bearer_auth(&self.config.token)
            .json(&NewPullRequest {
                title,
                body,
                head,
                base,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(text);
            warn!(status = status.as_u16(), message = %message, "pull request creation failed");
            return Err(VcsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let created: PullRequestResponse = response.json().await?;
        let url = created
            .html_url
            .ok_or_else(|| VcsError::InvalidResponse("missing html_url".into()))?;
        info!(number = ?created.number, url = %url, "created pull request");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> GitHubClient {
        GitHubClient::new(GitHubConfig {
            token: "ghp_test".into(),
            owner: "acme".into(),
            repo: "flux".into(),
            api_base_url: base.into(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn returns_html_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/flux/pulls"))
            .and(header("authorization", "Bearer ghp_test"))
            .and(header("accept", "application/vnd.github+json"))
            .and(body_json(serde_json::json!({
                "title": "[selfmod] add x",
                "body": "details",
                "head": "selfmod/1",
                "base": "main"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "number": 7,
                "html_url": "https://github.com/acme/flux/pull/7"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = client(&server.uri())
            .create_pull_request("[selfmod] add x", "details", "selfmod/1", "main")
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/acme/flux/pull/7");
    }

    #[tokio::test]
    async fn api_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Validation Failed"
            })))
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .create_pull_request("t", "b", "h", "main")
            .await;
        assert_matches!(
            result,
            Err(VcsError::Api { status: 422, message }) if message == "Validation Failed"
        );
    }

    #[tokio::test]
    async fn missing_url_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"number": 1})))
            .mount(&server)
            .await;

        let result = client(&server.uri())
            .create_pull_request("t", "b", "h", "main")
            .await;
        assert_matches!(result, Err(VcsError::InvalidResponse(_)));
    }
}
