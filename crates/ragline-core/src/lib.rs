//! ragline-core: retrieval-augmented generation gateway
//!
//! This crate provides the building blocks of the ragline service:
//! - OpenAI clients for embeddings, chat completion and moderation
//! - A SigV4-signed OpenSearch client managing kNN indices
//! - Document ingestion, grounded response generation and query
//!   classification exposed over HTTP

pub mod api;
pub mod error;
pub mod models;
pub mod openai;
pub mod opensearch;
pub mod prompts;
pub mod server;
pub mod sigv4;
pub mod store;
pub mod types;

// Testing utilities - available in test builds
#[cfg(test)]
pub mod testing;

pub use api::classifier::{ClassifyResponse, classify};
pub use api::documents::{create_index, ingest, validate_index_name};
pub use api::responses::{GeneratedResponse, MAX_TOP_K, Source, generate};
pub use error::{RagError, Result};
pub use models::{
    ChatClient, EmbeddingClient, LoggingChatClient, MockChatClient, MockEmbeddingClient,
    MockModerationClient, ModerationClient, SharedChatClient, SharedEmbeddingClient,
    SharedModerationClient, with_retry,
};
pub use openai::{
    ChatSettings, OpenAIChat, OpenAIConfig, OpenAIEmbeddings, OpenAIModeration, embedding_client,
    get_embedding, llm_client, moderate_user_message, moderation_client,
};
pub use opensearch::{AwsDomainDirectory, DomainDirectory, OpenSearchClient, StaticDomainDirectory};
pub use server::{AppDeps, DEFAULT_INDEX, DEFAULT_TOP_K, GatewayServer, PipelineConfig, ServerConfig};
pub use sigv4::{AwsCredentials, SigV4Signer, load_sdk_config};
pub use store::{InMemorySearchStore, SearchStore, SharedSearchStore};
pub use types::{
    ChatCompletion, ChatMessage, ChatRequest, ChatRole, EMBEDDING_DIMENSION, Embedding,
    ModerationVerdict, QueryCategory, SearchHit, StoredDocument, Usage,
};
