//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FluxSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::FluxSettings;

/// Resolve the default settings file (`~/.flux/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".flux").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FluxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FluxSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
fn read_layered(path: &Path) -> Result<FluxSettings> {
    let defaults = serde_json::to_value(FluxSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut FluxSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Empty values count as unset. Values that fail to parse are ignored with
/// a warning and the file/default value is kept.
pub fn apply_overrides_from<F>(settings: &mut FluxSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("FLUX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PORT", 1, 65535).or_else(|| env.u16("FLUX_PORT", 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("ALLOWED_ORIGIN") {
        settings.server.allowed_origins = parse_origin_list(&v);
    }

    // ── Providers ───────────────────────────────────────────────────
    if let Some(v) = env.string("ANTHROPIC_API_KEY") {
        settings.providers.anthropic.api_key = Some(v);
    }
    if let Some(v) = env.string("OPENAI_API_KEY") {
        settings.providers.openai.api_key = Some(v);
    }
    if let Some(v) = env.string("GEMINI_API_KEY") {
        settings.providers.gemini.api_key = Some(v);
    }
    if let Some(v) = env.string("DEFAULT_LLM_PROVIDER") {
        settings.providers.default_provider = v;
    }

    // ── Self-modification ───────────────────────────────────────────
    if let Some(v) = env.string("REPO_PATH") {
        settings.selfmod.repo_path = v;
    }
    if let Some(v) = env.bool("FLUX_SELFMOD_ENABLED") {
        settings.selfmod.enabled = v;
    }
    if let Some(v) = env.u64("FLUX_GENERATE_TIMEOUT_SECS", 1, 3600) {
        settings.selfmod.generate_timeout_secs = v;
    }

    // ── GitHub ──────────────────────────────────────────────────────
    if let Some(v) = env.string("GITHUB_TOKEN") {
        settings.github.token = Some(v);
    }
    if let Some(v) = env.string("GITHUB_OWNER") {
        settings.github.owner = Some(v);
    }
    if let Some(v) = env.string("GITHUB_REPO") {
        settings.github.repo = Some(v);
    }
    if let Some(v) = env.string("GITHUB_DEFAULT_BRANCH") {
        settings.github.default_branch = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("FLUX_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FLUX_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject combinations that cannot work at runtime.
pub fn validate(settings: &FluxSettings) -> Result<()> {
    let server = &settings.server;
    if server.allowed_origins.is_empty() {
        return Err(SettingsError::InvalidValue(
            "server.allowedOrigins must not be empty (use \"*\" to allow any)".into(),
        ));
    }
    if server.outbound_buffer == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundBuffer must be at least 1".into(),
        ));
    }
    if server.max_message_size == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxMessageSize must be at least 1".into(),
        ));
    }
    if server.heartbeat_interval_secs == 0
        || server.heartbeat_interval_secs >= server.idle_timeout_secs
    {
        return Err(SettingsError::InvalidValue(format!(
            "server.heartbeatIntervalSecs ({}) must be non-zero and below server.idleTimeoutSecs ({})",
            server.heartbeat_interval_secs, server.idle_timeout_secs
        )));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Split a comma-separated origin list, trimming blanks.
pub fn parse_origin_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
