//! OpenAI API clients.
//!
//! Factories for the three model capabilities the gateway uses: text
//! embeddings, chat completion and moderation. Each factory is a constructor
//! with fixed model settings; the API key and endpoint come from an explicit
//! [`OpenAIConfig`].

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::models::{ChatClient, EmbeddingClient, ModerationClient, with_retry};
use crate::types::{
    ChatCompletion, ChatMessage, ChatRequest, EMBEDDING_DIMENSION, Embedding, ModerationVerdict,
    Usage,
};

/// Default OpenAI API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";

/// Embedding model used for documents and queries.
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Chat model used for response generation and classification.
pub const CHAT_MODEL: &str = "gpt-4o";

/// Output cap for chat completions.
pub const CHAT_MAX_TOKENS: u32 = 500;

/// Automatic retries for transient chat failures.
pub const CHAT_MAX_RETRIES: u32 = 2;

/// Connection settings shared by every OpenAI client.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout. `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

impl OpenAIConfig {
    /// Create a new config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| RagError::Internal(format!("Failed to create HTTP client: {}", e)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::CONTENT_TYPE, "application/json")
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Create the embedding client (1536-dimensional vectors).
pub fn embedding_client(config: &OpenAIConfig) -> Result<OpenAIEmbeddings> {
    let client = OpenAIEmbeddings::new(config.clone())?;
    tracing::info!(model = EMBEDDING_MODEL, "OpenAI Embedding client initialised");
    Ok(client)
}

/// Create the chat client: deterministic decoding, 500-token cap, 2 retries,
/// no timeout.
///
/// A timeout set on `config` applies to embeddings and moderation only.
pub fn llm_client(config: &OpenAIConfig) -> Result<OpenAIChat> {
    let config = OpenAIConfig {
        timeout: None,
        ..config.clone()
    };
    let client = OpenAIChat::new(config, ChatSettings::default())?;
    tracing::info!(model = CHAT_MODEL, "OpenAI LLM client initialised");
    Ok(client)
}

/// Create the moderation client.
pub fn moderation_client(config: &OpenAIConfig) -> Result<OpenAIModeration> {
    let client = OpenAIModeration::new(config.clone())?;
    tracing::info!("OpenAI Moderation client initialised");
    Ok(client)
}

/// Convert text to an embedding with the given client.
pub async fn get_embedding(content: &str, client: &dyn EmbeddingClient) -> Result<Embedding> {
    let embedding = client.embed(content).await?;
    tracing::info!(dimensions = embedding.len(), "Text converted to embeddings");
    Ok(embedding)
}

/// Run a user message through the moderation check.
pub async fn moderate_user_message(
    client: &dyn ModerationClient,
    content: &str,
) -> Result<ModerationVerdict> {
    let verdict = client.moderate(content).await?;
    if verdict.flagged {
        tracing::warn!(categories = ?verdict.categories, "User message flagged by moderation");
    } else {
        tracing::debug!("User message passed moderation");
    }
    Ok(verdict)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Decode a JSON body, turning non-success statuses into errors.
async fn parse_response<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| RagError::Serialization(e.to_string()))
}

async fn error_from_response(response: Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    match status.as_u16() {
        401 => RagError::Config(format!("Authentication failed: {}", message)),
        code => RagError::upstream(code, message),
    }
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingApiRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiData {
    embedding: Embedding,
}

/// OpenAI embeddings client.
pub struct OpenAIEmbeddings {
    client: Client,
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbeddings {
    /// Create a client for the standard embedding model.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
            model: EMBEDDING_MODEL.to_string(),
            dimensions: EMBEDDING_DIMENSION,
        })
    }

    /// Model name sent with every request.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddings {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingApiRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        };

        let response = self
            .config
            .authorize(self.client.post(self.config.url("/v1/embeddings")))
            .json(&request)
            .send()
            .await?;

        let parsed: EmbeddingApiResponse = parse_response(response).await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::upstream(200, "No embedding returned from OpenAI"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai-embeddings"
    }
}

// ============================================================================
// Chat
// ============================================================================

/// Decoding settings for the chat client.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Model to use for completions.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// Maximum retries for transient errors.
    pub max_retries: u32,
    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: CHAT_MODEL.to_string(),
            temperature: 0.0,
            max_tokens: CHAT_MAX_TOKENS,
            max_retries: CHAT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    id: String,
    model: String,
    choices: Vec<ChatApiChoice>,
    #[serde(default)]
    usage: Option<ChatApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatApiChoice {
    message: ChatApiMessage,
}

#[derive(Debug, Deserialize)]
struct ChatApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ChatApiResponse> for ChatCompletion {
    fn from(response: ChatApiResponse) -> Self {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        ChatCompletion {
            id: response.id,
            model: response.model,
            content,
            usage,
        }
    }
}

/// OpenAI chat completions client.
pub struct OpenAIChat {
    client: Client,
    config: OpenAIConfig,
    settings: ChatSettings,
}

impl OpenAIChat {
    /// Create a chat client with explicit decoding settings.
    pub fn new(config: OpenAIConfig, settings: ChatSettings) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
            settings,
        })
    }

    /// Decoding settings in use.
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }
}

#[async_trait]
impl ChatClient for OpenAIChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let body = ChatApiRequest {
            model: &self.settings.model,
            messages: &request.messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(
            model = %body.model,
            messages = body.messages.len(),
            max_tokens = body.max_tokens,
            "Sending OpenAI chat request"
        );

        let body = &body;
        with_retry(
            self.settings.max_retries,
            self.settings.retry_backoff,
            "openai-chat",
            || async move {
                let response = self
                    .config
                    .authorize(self.client.post(self.config.url("/v1/chat/completions")))
                    .json(body)
                    .send()
                    .await?;

                let parsed: ChatApiResponse = parse_response(response).await?;
                Ok(ChatCompletion::from(parsed))
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

// ============================================================================
// Moderation
// ============================================================================

#[derive(Debug, Serialize)]
struct ModerationApiRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationApiResponse {
    results: Vec<ModerationApiResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationApiResult {
    flagged: bool,
    #[serde(default)]
    categories: std::collections::BTreeMap<String, bool>,
}

/// OpenAI moderation client.
pub struct OpenAIModeration {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIModeration {
    /// Create a moderation client.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }
}

#[async_trait]
impl ModerationClient for OpenAIModeration {
    async fn moderate(&self, content: &str) -> Result<ModerationVerdict> {
        let response = self
            .config
            .authorize(self.client.post(self.config.url("/v1/moderations")))
            .json(&ModerationApiRequest { input: content })
            .send()
            .await?;

        let parsed: ModerationApiResponse = parse_response(response).await?;
        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::upstream(200, "No moderation result returned from OpenAI"))?;

        let categories = result
            .categories
            .into_iter()
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| name)
            .collect();

        Ok(ModerationVerdict {
            flagged: result.flagged,
            categories,
        })
    }

    fn name(&self) -> &str {
        "openai-moderation"
    }
}
