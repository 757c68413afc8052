//! Configuration file support for ragline.
//!
//! Settings live in `.ragline/config.toml`, discovered by walking up from the
//! current directory. Environment variables override file values so secrets
//! can stay out of the file.

use std::path::{Path, PathBuf};

/// The ragline data directory name.
pub const RAGLINE_DIR: &str = ".ragline";
/// The config file name within the ragline directory.
pub const CONFIG_FILE: &str = "config.toml";

use anyhow::{Context, Result};
use ragline_core::{MAX_TOP_K, validate_index_name};
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerSection,
    /// OpenAI settings.
    pub openai: OpenAISection,
    /// OpenSearch settings.
    pub opensearch: OpenSearchSection,
    /// Retrieval pipeline settings.
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAISection {
    /// API key. Prefer `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Request timeout in seconds for embedding and moderation calls. Chat is unbounded.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenSearchSection {
    /// OpenSearch Service domain name.
    pub domain: String,
    /// AWS region of the domain.
    pub region: String,
    /// Cluster endpoint. When set, the domain lookup is skipped.
    pub endpoint: Option<String>,
    /// Domain configuration API base URL override.
    pub directory_url: Option<String>,
}

impl Default for OpenSearchSection {
    fn default() -> Self {
        Self {
            domain: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            directory_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Index used when a request does not name one.
    pub default_index: String,
    /// Passages retrieved per question.
    pub top_k: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            default_index: ragline_core::DEFAULT_INDEX.to_string(),
            top_k: ragline_core::DEFAULT_TOP_K,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Find and load configuration from current or parent directories.
    pub fn find_and_load() -> Result<Option<(Self, PathBuf)>> {
        let current = std::env::current_dir()?;
        Self::find_and_load_from(&current)
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Looks for `.ragline/config.toml` in the directory and its parents.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let ragline_dir = dir.join(RAGLINE_DIR);
            let config_path = ragline_dir.join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, ragline_dir)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`.
    ///
    /// Recognises `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `AWS_REGION`,
    /// `OPENSEARCH_DOMAIN` and `OPENSEARCH_ENDPOINT`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.openai.base_url = Some(url);
        }
        if let Some(region) = get("AWS_REGION") {
            self.opensearch.region = region;
        }
        if let Some(domain) = get("OPENSEARCH_DOMAIN") {
            self.opensearch.domain = domain;
        }
        if let Some(endpoint) = get("OPENSEARCH_ENDPOINT") {
            self.opensearch.endpoint = Some(endpoint);
        }
    }
}

/// Configuration validation error.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigValidationError {}

impl Config {
    /// Validate the configuration.
    ///
    /// Returns a list of validation errors if any are found.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message,
            })
        };

        if self.openai.api_key.as_deref().is_none_or(str::is_empty) {
            push(
                "openai.api_key",
                "OpenAI API key required. Set [openai] api_key or OPENAI_API_KEY env var."
                    .to_string(),
            );
        }

        if let Some(url) = &self.openai.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                push(
                    "openai.base_url",
                    format!("Invalid URL '{}'. Expected an http(s) URL.", url),
                );
            }
        }

        if self.opensearch.domain.is_empty() {
            push(
                "opensearch.domain",
                "OpenSearch domain required. Set [opensearch] domain or OPENSEARCH_DOMAIN env var."
                    .to_string(),
            );
        }

        if self.opensearch.region.is_empty() {
            push(
                "opensearch.region",
                "AWS region cannot be empty. Set [opensearch] region or AWS_REGION env var."
                    .to_string(),
            );
        }

        if !(1..=MAX_TOP_K).contains(&self.pipeline.top_k) {
            push(
                "pipeline.top_k",
                format!(
                    "Invalid top_k {}. Expected a value between 1 and {}.",
                    self.pipeline.top_k, MAX_TOP_K
                ),
            );
        }

        if let Err(e) = validate_index_name(&self.pipeline.default_index) {
            push("pipeline.default_index", e.to_string());
        }

        errors
    }
}

/// Contents written by `ragline init`.
pub const DEFAULT_CONFIG: &str = r#"# ragline configuration

[server]
host = "127.0.0.1"
port = 8000
enable_cors = true

[openai]
# api_key = "sk-..."  # Or use OPENAI_API_KEY env var
# timeout_secs = 60  # Embeddings and moderation only; chat has no timeout

[opensearch]
domain = ""  # Or use OPENSEARCH_DOMAIN env var
region = "us-east-1"  # Or use AWS_REGION env var
# endpoint = "search-mydomain-abc123.us-east-1.es.amazonaws.com"  # Skips the domain lookup

[pipeline]
default_index = "documents"
top_k = 3
"#;
