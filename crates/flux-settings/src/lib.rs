//! # flux-settings
//!
//! Configuration for the Flux server, loaded in layers (lowest first):
//! 1. **Compiled defaults** from [`FluxSettings::default()`]
//! 2. **User file** at `~/.flux/settings.json`, deep-merged over defaults
//! 3. **Environment variables** such as `PORT`, `GITHUB_TOKEN`, `REPO_PATH`

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
    validate,
};
pub use types::*;
