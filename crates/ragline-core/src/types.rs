//! Core types shared across the gateway.

use serde::{Deserialize, Serialize};

/// Dimensionality of every embedding vector produced and indexed.
pub const EMBEDDING_DIMENSION: usize = 1536;

/// A fixed-length numeric vector representing a piece of text.
pub type Embedding = Vec<f32>;

// ============================================================================
// Chat
// ============================================================================

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
///
/// Decoding parameters (model, temperature, output cap) belong to the client
/// that serves the request, not to the request itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Create a request from a list of messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Create a request with a system prompt followed by one user message.
    pub fn with_system(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
    }

    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Token usage reported for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A chat completion returned by a chat client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub model: String,
    pub content: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatCompletion {
    /// Create a completion with the given text.
    pub fn new(id: impl Into<String>, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            content: content.into(),
            usage: Usage::default(),
        }
    }
}

// ============================================================================
// Moderation
// ============================================================================

/// Outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModerationVerdict {
    /// Whether the content violates the usage policy.
    pub flagged: bool,
    /// Names of the policy categories that were triggered.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ModerationVerdict {
    /// A verdict that lets the content through.
    pub fn allowed() -> Self {
        Self::default()
    }

    /// A verdict that flags the content for the given categories.
    pub fn flagged(categories: Vec<String>) -> Self {
        Self {
            flagged: true,
            categories,
        }
    }
}

// ============================================================================
// Search store
// ============================================================================

/// A document as read back from the search store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Embedding,
}

/// A single nearest-neighbor search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub content: String,
}

// ============================================================================
// Query classification
// ============================================================================

/// Category assigned to an incoming user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Answerable from the indexed documents.
    DocumentQuestion,
    /// General conversation not tied to the documents.
    General,
    /// Outside what the service should answer.
    Unsupported,
}

impl QueryCategory {
    /// All categories, in prompt order.
    pub const ALL: [QueryCategory; 3] = [
        QueryCategory::DocumentQuestion,
        QueryCategory::General,
        QueryCategory::Unsupported,
    ];

    /// Wire label for the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::DocumentQuestion => "document_question",
            QueryCategory::General => "general",
            QueryCategory::Unsupported => "unsupported",
        }
    }

    /// Parse a model answer into a category.
    ///
    /// Accepts surrounding whitespace, quotes, punctuation and case
    /// differences. Returns `None` when no label matches.
    pub fn parse_label(text: &str) -> Option<Self> {
        let label = text
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");

        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
