//! Model client traits and implementations.
//!
//! This module defines the capability traits the gateway needs from a model
//! provider (embedding text, chat completion, content moderation) and provides
//! in-memory implementations for testing.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::types::{
    ChatCompletion, ChatRequest, EMBEDDING_DIMENSION, Embedding, ModerationVerdict,
};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (see [`RagError::is_retryable`]).
/// Non-retryable errors are returned immediately. The operation runs at most
/// `max_retries + 1` times.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    client_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    client = client_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Converts text into a fixed-length embedding vector.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Length of every vector this client produces.
    fn dimensions(&self) -> usize;

    /// Get the name of this client.
    fn name(&self) -> &str;
}

/// Produces chat completions.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Execute a completion request and return the full response.
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;

    /// Get the name of this client.
    fn name(&self) -> &str;
}

/// Checks content against a usage policy.
#[async_trait]
pub trait ModerationClient: Send + Sync {
    /// Classify a piece of content.
    async fn moderate(&self, content: &str) -> Result<ModerationVerdict>;

    /// Get the name of this client.
    fn name(&self) -> &str;
}

/// An embedding client that can be shared across threads.
pub type SharedEmbeddingClient = Arc<dyn EmbeddingClient>;

/// A chat client that can be shared across threads.
pub type SharedChatClient = Arc<dyn ChatClient>;

/// A moderation client that can be shared across threads.
pub type SharedModerationClient = Arc<dyn ModerationClient>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic embedding client for testing.
///
/// The same text always yields the same unit-length vector; different texts
/// yield different vectors.
#[derive(Debug)]
pub struct MockEmbeddingClient {
    dimensions: usize,
    inputs: Mutex<Vec<String>>,
}

impl MockEmbeddingClient {
    /// Create a mock producing vectors of the standard dimension.
    pub fn new() -> Self {
        Self::with_dimensions(EMBEDDING_DIMENSION)
    }

    /// Create a mock producing vectors of the given dimension.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Texts that have been embedded, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    /// Compute the vector this mock returns for `text`.
    pub fn vector_for(&self, text: &str) -> Embedding {
        pseudo_embedding(text, self.dimensions)
    }
}

impl Default for MockEmbeddingClient {
    fn default() -> Self {
        Self::new()
    }
}

fn pseudo_embedding(text: &str, dimensions: usize) -> Embedding {
    let digest = Sha256::digest(text.as_bytes());
    let mut vector: Embedding = (0..dimensions)
        .map(|i| {
            let byte = f32::from(digest[i % digest.len()]);
            let round = (i / digest.len()) as f32 + 1.0;
            ((byte + 1.0) * round).sin()
        })
        .collect();

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(pseudo_embedding(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock-embeddings"
    }
}

/// A mock chat client for testing purposes.
///
/// Returns pre-configured completions in order and records every request.
#[derive(Debug, Default)]
pub struct MockChatClient {
    responses: Mutex<VecDeque<ChatCompletion>>,
    request_log: Mutex<Vec<ChatRequest>>,
}

impl MockChatClient {
    /// Create a new mock client with the given responses.
    ///
    /// If more requests are made than responses available, an error is
    /// returned.
    pub fn new(responses: Vec<ChatCompletion>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock client with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![ChatCompletion::new("mock_cmpl_1", "mock-model", text)])
    }

    /// Create a mock client answering each request with the next text.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .enumerate()
                .map(|(i, t)| ChatCompletion::new(format!("mock_cmpl_{}", i + 1), "mock-model", t))
                .collect(),
        )
    }

    /// Get all requests that were made to this client.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        self.request_log.lock().unwrap().push(request);

        self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            RagError::upstream(500, "MockChatClient: no more responses available")
        })
    }

    fn name(&self) -> &str {
        "mock-chat"
    }
}

/// A mock moderation client that flags content containing blocked terms.
#[derive(Debug, Default)]
pub struct MockModerationClient {
    blocked: Vec<(String, String)>,
    checked: Mutex<Vec<String>>,
}

impl MockModerationClient {
    /// Create a client that allows everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag content containing `term` (case-insensitive) under `category`.
    pub fn block(mut self, term: impl Into<String>, category: impl Into<String>) -> Self {
        self.blocked
            .push((term.into().to_lowercase(), category.into()));
        self
    }

    /// Contents that have been checked, in call order.
    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModerationClient for MockModerationClient {
    async fn moderate(&self, content: &str) -> Result<ModerationVerdict> {
        self.checked.lock().unwrap().push(content.to_string());

        let lowered = content.to_lowercase();
        let categories: Vec<String> = self
            .blocked
            .iter()
            .filter(|(term, _)| lowered.contains(term.as_str()))
            .map(|(_, category)| category.clone())
            .collect();

        if categories.is_empty() {
            Ok(ModerationVerdict::allowed())
        } else {
            Ok(ModerationVerdict::flagged(categories))
        }
    }

    fn name(&self) -> &str {
        "mock-moderation"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Decorator
// ─────────────────────────────────────────────────────────────────────────────

/// A chat client that wraps another client with request/response logging.
pub struct LoggingChatClient<C: ChatClient> {
    inner: C,
    name: String,
}

impl<C: ChatClient> LoggingChatClient<C> {
    /// Create a new logging client.
    pub fn new(inner: C) -> Self {
        let name = format!("logging({})", inner.name());
        Self { inner, name }
    }
}

#[async_trait]
impl<C: ChatClient> ChatClient for LoggingChatClient<C> {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        tracing::debug!(
            client = self.inner.name(),
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(completion) => {
                tracing::debug!(
                    client = self.inner.name(),
                    completion_id = %completion.id,
                    prompt_tokens = completion.usage.prompt_tokens,
                    completion_tokens = completion.usage.completion_tokens,
                    duration_ms = elapsed.as_millis() as u64,
                    "Chat completion successful"
                );
            }
            Err(e) => {
                tracing::warn!(
                    client = self.inner.name(),
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Chat completion failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
