//! Configuration management for filinglens.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `filinglens.toml` file
//! 3. User config `~/.config/filinglens/config.toml`
//! 4. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod defaults;

pub use defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model provider configuration.
    pub model: ModelConfig,

    /// Document retrieval configuration.
    pub retrieval: RetrievalConfig,

    /// Per-document analysis configuration.
    pub analysis: AnalysisConfig,

    /// Session persistence configuration.
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./filinglens.toml` (project local)
    /// 2. `~/.config/filinglens/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new("filinglens.toml").exists() {
            return Self::from_file("filinglens.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("filinglens").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("FILINGLENS_MODEL") {
            self.model.model = model;
        }
        if let Ok(url) = std::env::var("FILINGLENS_MODEL_URL") {
            self.model.base_url = url;
        }
        if let Ok(keys) = std::env::var("FILINGLENS_API_KEYS") {
            self.model.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Ok(agent) = std::env::var("FILINGLENS_USER_AGENT") {
            self.retrieval.user_agent = agent;
        }
        if let Ok(dir) = std::env::var("FILINGLENS_DATA_DIR") {
            self.session.data_dir = dir;
        }
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model used for analysis and synthesis.
    pub model: String,

    /// Lightweight model used for exhibit classification.
    pub classifier_model: String,

    /// Generative API base URL.
    pub base_url: String,

    /// API keys, rotated round-robin across calls.
    /// Can also be set via FILINGLENS_API_KEYS (comma-separated).
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,

    /// Maximum output tokens per response.
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            base_url: DEFAULT_MODEL_URL.to_string(),
            api_keys: Vec::new(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl ModelConfig {
    /// Get API keys from config or environment.
    pub fn api_keys_or_env(&self) -> Vec<String> {
        if !self.api_keys.is_empty() {
            return self.api_keys.clone();
        }
        if let Ok(keys) = std::env::var("FILINGLENS_API_KEYS") {
            let keys: Vec<String> = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !keys.is_empty() {
                return keys;
            }
        }
        std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|k| vec![k])
            .unwrap_or_default()
    }
}

/// Document retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// User-Agent sent with every outbound request.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retry attempts per HTTP fetch.
    pub fetch_retries: u32,

    /// Base delay between retries in milliseconds.
    pub retry_delay_ms: u64,

    /// Ceiling on extracted document text, in characters.
    pub max_content_length: usize,

    /// Page size for paged announcement listings.
    pub page_size: usize,

    /// Transcripts fetched concurrently per batch.
    pub batch_size: usize,

    /// Rate limit: calls allowed per window.
    pub rate_limit_calls: usize,

    /// Rate limit window in seconds.
    pub rate_limit_window_secs: u64,

    /// TTL for cached document sets in seconds.
    pub cache_ttl_secs: u64,

    /// Periodic-report and listing form types.
    pub report_forms: Vec<String>,

    /// Non-report form types, included on request.
    pub other_forms: Vec<String>,

    /// Form types treated as envelopes and expanded into exhibits.
    pub envelope_forms: Vec<String>,

    /// Filename marker identifying substantive exhibits.
    pub exhibit_marker: String,

    /// Base URL of the regulatory filing registry.
    pub filings_base_url: String,

    /// Base URL of the exchange announcement service.
    pub announcements_base_url: String,

    /// Base URL of the transcript provider.
    pub transcripts_base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit_calls: DEFAULT_RATE_LIMIT_CALLS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            report_forms: DEFAULT_REPORT_FORMS.iter().map(|s| s.to_string()).collect(),
            other_forms: DEFAULT_OTHER_FORMS.iter().map(|s| s.to_string()).collect(),
            envelope_forms: DEFAULT_ENVELOPE_FORMS.iter().map(|s| s.to_string()).collect(),
            exhibit_marker: DEFAULT_EXHIBIT_MARKER.to_string(),
            filings_base_url: DEFAULT_FILINGS_URL.to_string(),
            announcements_base_url: DEFAULT_ANNOUNCEMENTS_URL.to_string(),
            transcripts_base_url: DEFAULT_TRANSCRIPTS_URL.to_string(),
        }
    }
}

/// Per-document analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Wall-clock timeout for one document analysis, in seconds.
    pub timeout_secs: u64,

    /// Interval between worker progress polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// Attempts per document before recording a failure placeholder.
    pub max_retries: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_ANALYSIS_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_retries: DEFAULT_ANALYSIS_RETRIES,
        }
    }
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base directory for filinglens data (default: ".filinglens").
    pub data_dir: String,

    /// Session checkpoint file name.
    pub session_file: String,

    /// Artifacts subdirectory name.
    pub artifacts_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            session_file: DEFAULT_SESSION_FILE.to_string(),
            artifacts_dir: DEFAULT_ARTIFACTS_DIR.to_string(),
        }
    }
}

impl SessionConfig {
    /// Full path to the session checkpoint file.
    pub fn session_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.session_file)
    }

    /// Full path to the artifacts directory.
    pub fn artifacts_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.artifacts_dir)
    }
}
