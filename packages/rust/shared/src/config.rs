//! Application configuration for the discovery pipeline.
//!
//! User config lives at `~/.obituary/obituary.toml`.
//! Secrets are never stored in the file, only the names of the env vars
//! that hold them. [`DiscoveryConfig::resolve`] reads those once and
//! produces the explicit config object handed to the orchestrator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ObituaryError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "obituary.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".obituary";

// ---------------------------------------------------------------------------
// Config structs (matching obituary.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline tuning knobs.
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Search provider settings.
    #[serde(default)]
    pub search: SearchSettings,

    /// OpenRouter settings for the classifier.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Content store settings.
    #[serde(default)]
    pub store: StoreSettings,

    /// HTTP trigger settings.
    #[serde(default)]
    pub server: ServerSettings,
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// How far back each sweep looks, in hours.
    #[serde(default = "default_since_window_hours")]
    pub since_window_hours: u32,

    /// Minimum model confidence for a claim to be approved.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Result cap for each search sub-query.
    #[serde(default = "default_max_results")]
    pub max_results_per_search: u32,

    /// Maximum classification calls in flight.
    #[serde(default = "default_classify_concurrency")]
    pub classify_concurrency: u32,

    /// Per-call classification timeout.
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,

    /// Upper bound on a whole run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Optional JSON file overriding the built-in capability timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            since_window_hours: default_since_window_hours(),
            acceptance_threshold: default_acceptance_threshold(),
            max_results_per_search: default_max_results(),
            classify_concurrency: default_classify_concurrency(),
            classify_timeout_secs: default_classify_timeout(),
            run_timeout_secs: default_run_timeout(),
            metrics_path: None,
        }
    }
}

fn default_since_window_hours() -> u32 {
    24
}
fn default_acceptance_threshold() -> f64 {
    0.7
}
fn default_max_results() -> u32 {
    50
}
fn default_classify_concurrency() -> u32 {
    4
}
fn default_classify_timeout() -> u64 {
    30
}
fn default_run_timeout() -> u64 {
    280
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search API base URL.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
        }
    }
}

fn default_search_key_env() -> String {
    "EXA_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://api.exa.ai".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for classification.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL.
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_openrouter_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Remote libSQL URL (`libsql://` or `https://`). Takes precedence over `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote store auth token.
    #[serde(default = "default_store_token_env")]
    pub auth_token_env: String,

    /// Local database file used when no remote URL is configured.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: None,
            auth_token_env: default_store_token_env(),
            path: default_store_path(),
        }
    }
}

fn default_store_token_env() -> String {
    "OBITUARY_STORE_TOKEN".into()
}
fn default_store_path() -> String {
    "~/.obituary/content.db".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address for the HTTP trigger.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Name of the env var holding the shared run secret.
    #[serde(default = "default_run_secret_env")]
    pub run_secret_env: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            run_secret_env: default_run_secret_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".into()
}
fn default_run_secret_env() -> String {
    "CRON_SECRET".into()
}

// ---------------------------------------------------------------------------
// Discovery config (runtime, resolved from config file + environment)
// ---------------------------------------------------------------------------

/// Where the content store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCredentials {
    /// Remote libSQL service.
    Remote { url: String, auth_token: String },
    /// Local database file (development).
    Local { path: PathBuf },
}

impl StoreCredentials {
    /// Whether a remote store is configured.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Explicit configuration object passed to the pipeline at construction.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub search_api_key: Option<String>,
    pub search_base_url: String,
    pub classifier_api_key: Option<String>,
    pub classifier_model: String,
    pub classifier_base_url: String,
    pub store: StoreCredentials,
    pub run_secret: Option<String>,
    pub since_window_hours: u32,
    pub acceptance_threshold: f64,
    pub max_results_per_search: u32,
    pub classify_concurrency: u32,
    pub classify_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub metrics_path: Option<PathBuf>,
}

impl DiscoveryConfig {
    /// Resolve secrets from the environment and validate the result.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        let store = match &config.store.url {
            Some(url) if !url.trim().is_empty() => {
                let auth_token = read_env(&config.store.auth_token_env).ok_or_else(|| {
                    ObituaryError::config(format!(
                        "remote store {url} configured but {} is not set",
                        config.store.auth_token_env
                    ))
                })?;
                StoreCredentials::Remote {
                    url: url.clone(),
                    auth_token,
                }
            }
            _ => StoreCredentials::Local {
                path: expand_home(&config.store.path)?,
            },
        };

        let resolved = Self {
            search_api_key: read_env(&config.search.api_key_env),
            search_base_url: config.search.base_url.clone(),
            classifier_api_key: read_env(&config.openrouter.api_key_env),
            classifier_model: config.openrouter.default_model.clone(),
            classifier_base_url: config.openrouter.base_url.clone(),
            store,
            run_secret: read_env(&config.server.run_secret_env),
            since_window_hours: config.discovery.since_window_hours,
            acceptance_threshold: config.discovery.acceptance_threshold,
            max_results_per_search: config.discovery.max_results_per_search,
            classify_concurrency: config.discovery.classify_concurrency,
            classify_timeout_secs: config.discovery.classify_timeout_secs,
            run_timeout_secs: config.discovery.run_timeout_secs,
            metrics_path: config
                .discovery
                .metrics_path
                .as_deref()
                .map(expand_home)
                .transpose()?,
        };
        resolved.validate()?;
        Ok(resolved)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err(ObituaryError::validation(format!(
                "acceptance_threshold {} must be within [0, 1]",
                self.acceptance_threshold
            )));
        }
        if self.classify_concurrency == 0 {
            return Err(ObituaryError::validation(
                "classify_concurrency must be at least 1",
            ));
        }
        if self.max_results_per_search == 0 {
            return Err(ObituaryError::validation(
                "max_results_per_search must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Read a non-empty env var.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ObituaryError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.obituary/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ObituaryError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.obituary/obituary.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ObituaryError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ObituaryError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ObituaryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ObituaryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ObituaryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
