//! Settings schema with compiled defaults.
//!
//! Serialized as camelCase JSON so `~/.flux/settings.json` reads naturally.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FluxSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Model providers.
    pub providers: ProviderSettings,
    /// Change engine.
    pub selfmod: SelfModSettings,
    /// Remote repository integration.
    pub github: GitHubSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Listener and connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Accepted `Origin` header values; `*` accepts any.
    pub allowed_origins: Vec<String>,
    /// Idle time on the write side before a ping is sent.
    pub heartbeat_interval_secs: u64,
    /// Longest silence tolerated on the read side.
    pub idle_timeout_secs: u64,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Upper bound on a single transport write.
    pub write_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            heartbeat_interval_secs: 54,
            idle_timeout_secs: 60,
            max_message_size: 512 * 1024,
            outbound_buffer: 256,
            write_timeout_secs: 10,
        }
    }
}

/// Credentials and model choice for one vendor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderCredentials {
    /// API key; the provider is not registered without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// Override for the vendor's API root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Model provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Provider used when a request names none.
    pub default_provider: String,
    /// Anthropic Messages API.
    pub anthropic: ProviderCredentials,
    /// `OpenAI` chat completions API.
    pub openai: ProviderCredentials,
    /// Google Gemini API.
    pub gemini: ProviderCredentials,
    /// Token ceiling per response.
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            default_provider: "anthropic".to_string(),
            anthropic: ProviderCredentials {
                model: "claude-sonnet-4-20250514".to_string(),
                ..ProviderCredentials::default()
            },
            openai: ProviderCredentials {
                model: "gpt-4o".to_string(),
                ..ProviderCredentials::default()
            },
            gemini: ProviderCredentials {
                model: "gemini-2.0-flash".to_string(),
                ..ProviderCredentials::default()
            },
            max_tokens: 4096,
        }
    }
}

/// Change engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelfModSettings {
    /// Whether change requests are accepted at all.
    pub enabled: bool,
    /// Working tree the engine reads and writes.
    pub repo_path: String,
    /// Upper bound on one generation round trip.
    pub generate_timeout_secs: u64,
    /// Upper bound on each git command.
    pub git_timeout_secs: u64,
}

impl Default for SelfModSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: "/tmp/flux-repo".to_string(),
            generate_timeout_secs: 120,
            git_timeout_secs: 60,
        }
    }
}

/// Remote repository integration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitHubSettings {
    /// Token used for push and the pulls API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Repository owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Repository name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Base branch for pull requests.
    pub default_branch: String,
    /// REST API root.
    pub api_base_url: String,
    /// Commit author name.
    pub author_name: String,
    /// Commit author email.
    pub author_email: String,
    /// Upper bound on one pulls API request.
    pub request_timeout_secs: u64,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            repo: None,
            default_branch: "main".to_string(),
            api_base_url: "https://api.github.com".to_string(),
            author_name: "Flux".to_string(),
            author_email: "flux@bot.local".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl GitHubSettings {
    /// Token, owner and repo are all present and non-empty.
    pub fn is_configured(&self) -> bool {
        [&self.token, &self.owner, &self.repo]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// `https://github.com/<owner>/<repo>.git`, when owner and repo are set.
    pub fn clone_url(&self) -> Option<String> {
        let owner = self.owner.as_deref()?;
        let repo = self.repo.as_deref()?;
        Some(format!("https://github.com/{owner}/{repo}.git"))
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
