//! Builds server collaborators from settings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flux_llm::ProviderRegistry;
use flux_llm::anthropic::{AnthropicConfig, AnthropicProvider};
use flux_llm::gemini::{GeminiConfig, GeminiProvider};
use flux_llm::openai::{OpenAiConfig, OpenAiProvider};
use flux_selfmod::{ChangeEngine, EngineConfig};
use flux_server::PublishTarget;
use flux_settings::{FluxSettings, GitHubSettings, ProviderSettings};
use flux_vcs::{GitConfig, GitHubClient, GitHubConfig, GitRepository, PullRequestHost, VersionControl};
use tracing::{info, warn};

/// Register every provider that has an API key.
pub fn build_providers(settings: &ProviderSettings) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if let Some(api_key) = non_empty(settings.anthropic.api_key.as_deref()) {
        let _ = registry.register(Arc::new(AnthropicProvider::new(AnthropicConfig {
            api_key: api_key.to_owned(),
            model: settings.anthropic.model.clone(),
            base_url: settings.anthropic.base_url.clone(),
            max_tokens: settings.max_tokens,
        })));
    }
    if let Some(api_key) = non_empty(settings.openai.api_key.as_deref()) {
        let _ = registry.register(Arc::new(OpenAiProvider::new(OpenAiConfig {
            api_key: api_key.to_owned(),
            model: settings.openai.model.clone(),
            base_url: settings.openai.base_url.clone(),
            max_tokens: settings.max_tokens,
        })));
    }
    if let Some(api_key) = non_empty(settings.gemini.api_key.as_deref()) {
        let _ = registry.register(Arc::new(GeminiProvider::new(GeminiConfig {
            api_key: api_key.to_owned(),
            model: settings.gemini.model.clone(),
            base_url: settings.gemini.base_url.clone(),
            max_tokens: settings.max_tokens,
        })));
    }

    if registry.is_empty() {
        warn!("no chat provider has an API key; chat requests will fail");
    } else if registry.get(&settings.default_provider).is_none() {
        warn!(
            default = %settings.default_provider,
            available = ?registry.ids(),
            "default provider is not registered"
        );
    }
    registry
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Change engine and, when GitHub is configured and the clone succeeds,
/// a publish target.
pub struct SelfModWiring {
    /// Engine over the working tree.
    pub engine: Option<Arc<ChangeEngine>>,
    /// Remote publishing collaborators.
    pub target: Option<PublishTarget>,
}

/// Prepare the working tree and build the self-modification collaborators.
///
/// Every failure here disables the affected feature instead of aborting
/// startup.
pub async fn build_selfmod(settings: &FluxSettings) -> SelfModWiring {
    let disabled = SelfModWiring {
        engine: None,
        target: None,
    };
    if !settings.selfmod.enabled {
        info!("self-modification disabled");
        return disabled;
    }

    let repo_path = PathBuf::from(&settings.selfmod.repo_path);
    let target = if settings.github.is_configured() {
        let repo = Arc::new(GitRepository::new(git_config(settings, &repo_path)));
        match repo.clone_or_open().await {
            Ok(()) => publish_target(&settings.github, repo),
            Err(e) => {
                warn!(error = %e, path = %repo_path.display(), "repository unavailable, pull requests disabled");
                None
            }
        }
    } else {
        info!("GitHub not configured, approved changes are applied locally only");
        None
    };

    if target.is_none() {
        if let Err(e) = std::fs::create_dir_all(&repo_path) {
            warn!(error = %e, path = %repo_path.display(), "working tree unavailable, self-modification disabled");
            return disabled;
        }
    }

    let engine = ChangeEngine::new(EngineConfig {
        repo_path,
        generate_timeout: Duration::from_secs(settings.selfmod.generate_timeout_secs),
    });
    info!(path = %engine.repo_path().display(), remote = target.is_some(), "self-modification enabled");
    SelfModWiring {
        engine: Some(Arc::new(engine)),
        target,
    }
}

fn git_config(settings: &FluxSettings, repo_path: &std::path::Path) -> GitConfig {
    GitConfig {
        repo_path: repo_path.to_path_buf(),
        clone_url: settings.github.clone_url(),
        token: settings.github.token.clone(),
        default_branch: settings.github.default_branch.clone(),
        author_name: settings.github.author_name.clone(),
        author_email: settings.github.author_email.clone(),
        command_timeout: Duration::from_secs(settings.selfmod.git_timeout_secs),
    }
}

fn publish_target(github: &GitHubSettings, repo: Arc<GitRepository>) -> Option<PublishTarget> {
    let (Some(token), Some(owner), Some(name)) = (&github.token, &github.owner, &github.repo) else {
        return None;
    };
    let client = GitHubClient::new(GitHubConfig {
        token: token.clone(),
        owner: owner.clone(),
        repo: name.clone(),
        api_base_url: github.api_base_url.clone(),
        request_timeout: Duration::from_secs(github.request_timeout_secs),
    });
    match client {
        Ok(client) => Some(PublishTarget {
            vcs: repo as Arc<dyn VersionControl>,
            host: Arc::new(client) as Arc<dyn PullRequestHost>,
            default_branch: github.default_branch.clone(),
        }),
        Err(e) => {
            warn!(error = %e, "GitHub client unavailable, pull requests disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_need_keys() {
        let registry = build_providers(&ProviderSettings::default());
        assert!(registry.is_empty());
    }

    #[test]
    fn keyed_providers_are_registered() {
        let mut settings = ProviderSettings::default();
        settings.anthropic.api_key = Some("sk-ant".into());
        settings.openai.api_key = Some(String::new());
        settings.gemini.api_key = Some("g-key".into());
        let registry = build_providers(&settings);
        assert_eq!(registry.ids(), vec!["anthropic".to_owned(), "gemini".to_owned()]);
    }

    #[tokio::test]
    async fn disabled_selfmod_builds_nothing() {
        let mut settings = FluxSettings::default();
        settings.selfmod.enabled = false;
        let wiring = build_selfmod(&settings).await;
        assert!(wiring.engine.is_none());
        assert!(wiring.target.is_none());
    }

    #[tokio::test]
    async fn local_mode_creates_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("work");
        let mut settings = FluxSettings::default();
        settings.selfmod.repo_path = repo.to_string_lossy().into_owned();
        settings.github.token = None;

        let wiring = build_selfmod(&settings).await;
        assert!(wiring.engine.is_some());
        assert!(wiring.target.is_none());
        assert!(repo.is_dir());
    }
}
