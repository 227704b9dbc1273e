use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CAPACITY;
use crate::matcher::{LOAD_WINDOW_MINUTES, SUBMIT_WINDOW_MINUTES, SignatureMatcher};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuillConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tunables of the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Records kept per subject in the local cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Minimum body length, in characters after trimming.
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
    /// Match window right after a submit.
    #[serde(default = "default_submit_window")]
    pub submit_window_minutes: f64,
    /// Match window for stale pending records at load time.
    #[serde(default = "default_load_window")]
    pub load_window_minutes: f64,
    /// Re-fetch policy after a create succeeds.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            min_body_chars: default_min_body_chars(),
            submit_window_minutes: default_submit_window(),
            load_window_minutes: default_load_window(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn submit_matcher(&self) -> SignatureMatcher {
        SignatureMatcher::new(self.submit_window_minutes)
    }

    #[must_use]
    pub const fn load_matcher(&self) -> SignatureMatcher {
        SignatureMatcher::new(self.load_window_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Key prefix shared with the legacy browser widget.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Directory of the file-backed store. Defaults to the platform data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            dir: None,
        }
    }
}

impl StorageConfig {
    /// Directory to open the file store in.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir().map_or_else(|| PathBuf::from(".quill"), |dir| dir.join("quill"))
        })
    }
}

const fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}

const fn default_min_body_chars() -> usize {
    3
}

const fn default_submit_window() -> f64 {
    SUBMIT_WINDOW_MINUTES
}

const fn default_load_window() -> f64 {
    LOAD_WINDOW_MINUTES
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

fn default_namespace() -> String {
    "dt".to_string()
}

/// Parse a config file. A missing file yields the defaults.
pub fn load_config_file(path: &Path) -> Result<QuillConfig> {
    if !path.exists() {
        return Ok(QuillConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<QuillConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// `<config dir>/quill/config.toml`, when the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quill/config.toml"))
}

/// Load the user config: `QUILL_CONFIG` if set, else the default path.
pub fn load_user_config() -> Result<QuillConfig> {
    let path = env::var_os("QUILL_CONFIG")
        .map(PathBuf::from)
        .or_else(default_config_path);

    match path {
        Some(path) => load_config_file(&path),
        None => Ok(QuillConfig::default()),
    }
}

/// Apply `QUILL_API_URL` and `QUILL_DATA_DIR` overrides read through `var`.
pub fn apply_env_overrides(config: &mut QuillConfig, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty("QUILL_API_URL") {
        config.api.base_url = url;
    }
    if let Some(dir) = non_empty("QUILL_DATA_DIR") {
        config.storage.dir = Some(PathBuf::from(dir));
    }
}

/// Effective config: explicit path or user config, then env overrides.
pub fn resolve_config(explicit: Option<&Path>) -> Result<QuillConfig> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => load_user_config()?,
    };
    apply_env_overrides(&mut config, |key| env::var(key).ok());
    Ok(config)
}
