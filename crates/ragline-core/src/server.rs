//! HTTP gateway for the RAG pipeline.
//!
//! Routes:
//! - `GET /health`
//! - `/api/...` - document processing, response generation and query
//!   classification (see [`crate::api`])

use axum::{
    Json, Router as AxumRouter,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::RagError;
use crate::models::{SharedChatClient, SharedEmbeddingClient, SharedModerationClient};
use crate::store::SharedSearchStore;

/// Index used when a request does not name one.
pub const DEFAULT_INDEX: &str = "documents";

/// Passages retrieved per question when a request does not say.
pub const DEFAULT_TOP_K: usize = 3;

/// Pipeline defaults applied to API requests.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Index used when a request does not name one.
    pub default_index: String,
    /// Passages retrieved per question.
    pub top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_index: DEFAULT_INDEX.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
    /// Whether to enable CORS.
    pub enable_cors: bool,
    /// Whether to enable request tracing (HTTP layer).
    pub enable_tracing: bool,
    /// Pipeline defaults.
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            enable_cors: true,
            enable_tracing: true,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with the given bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Enable or disable the HTTP trace layer.
    pub fn with_tracing(mut self, enable: bool) -> Self {
        self.enable_tracing = enable;
        self
    }

    /// Set the pipeline defaults.
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// External collaborators the gateway calls into.
#[derive(Clone)]
pub struct AppDeps {
    pub embeddings: SharedEmbeddingClient,
    pub chat: SharedChatClient,
    pub moderation: SharedModerationClient,
    pub store: SharedSearchStore,
}

impl AppDeps {
    /// Bundle the clients.
    pub fn new(
        embeddings: SharedEmbeddingClient,
        chat: SharedChatClient,
        moderation: SharedModerationClient,
        store: SharedSearchStore,
    ) -> Self {
        Self {
            embeddings,
            chat,
            moderation,
            store,
        }
    }
}

/// Shared state for request handlers.
pub(crate) struct AppState {
    pub(crate) deps: AppDeps,
    pub(crate) pipeline: PipelineConfig,
}

/// The gateway server.
pub struct GatewayServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    /// Create a new server over the given clients.
    pub fn new(config: ServerConfig, deps: AppDeps) -> Self {
        let state = Arc::new(AppState {
            deps,
            pipeline: config.pipeline.clone(),
        });
        Self { config, state }
    }

    /// Build the axum router.
    pub fn router(&self) -> AxumRouter {
        let mut router = AxumRouter::new()
            .route("/health", get(handle_health))
            .nest("/api", crate::api::routes())
            .with_state(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Starting RAG gateway");
        axum::serve(listener, self.router()).await
    }

    /// Run the server with graceful shutdown.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Starting RAG gateway");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Handle GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ragline"
    }))
}

/// Error type for API responses.
#[derive(Debug)]
pub struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self.0 {
            RagError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            RagError::Network(_) => (StatusCode::BAD_GATEWAY, "network_error"),
            RagError::Serialization(_) => (StatusCode::BAD_GATEWAY, "serialization_error"),
            RagError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            RagError::Moderation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "moderation_rejected"),
            RagError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }

        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": self.0.to_string()
            }
        });

        (status, Json(body)).into_response()
    }
}
