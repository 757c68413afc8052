//! Test fixtures and builders for common test scenarios.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use crate::models::{MockChatClient, MockEmbeddingClient, MockModerationClient};
use crate::server::{AppDeps, GatewayServer, ServerConfig};
use crate::store::InMemorySearchStore;

// ============================================================================
// Server Helpers
// ============================================================================

/// Mock collaborators kept as concrete types so tests can inspect them.
pub struct TestDeps {
    pub embeddings: Arc<MockEmbeddingClient>,
    pub chat: Arc<MockChatClient>,
    pub moderation: Arc<MockModerationClient>,
    pub store: Arc<InMemorySearchStore>,
}

impl TestDeps {
    /// Mocks with no queued chat responses and nothing blocked.
    pub fn new() -> Self {
        Self {
            embeddings: Arc::new(MockEmbeddingClient::new()),
            chat: Arc::new(MockChatClient::default()),
            moderation: Arc::new(MockModerationClient::new()),
            store: Arc::new(InMemorySearchStore::new()),
        }
    }

    /// Answer chat requests with the given texts, in order.
    pub fn with_chat_texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chat = Arc::new(MockChatClient::with_texts(texts));
        self
    }

    /// Use the given moderation mock.
    pub fn with_moderation(mut self, moderation: MockModerationClient) -> Self {
        self.moderation = Arc::new(moderation);
        self
    }

    /// Share the mocks as gateway dependencies.
    pub fn app_deps(&self) -> AppDeps {
        AppDeps::new(
            self.embeddings.clone(),
            self.chat.clone(),
            self.moderation.clone(),
            self.store.clone(),
        )
    }
}

impl Default for TestDeps {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a gateway over the mocks with HTTP tracing disabled.
pub fn test_server(deps: &TestDeps) -> GatewayServer {
    GatewayServer::new(ServerConfig::default().with_tracing(false), deps.app_deps())
}

/// Send one request through a router and decode the JSON response.
///
/// Returns `Value::Null` for empty bodies.
pub async fn send_json(
    router: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .oneshot(builder.body(body).expect("Failed to build request"))
        .await
        .expect("Router failed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");

    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Response was not JSON")
    };
    (status, value)
}
