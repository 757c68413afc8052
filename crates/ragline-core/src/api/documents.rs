//! Document processing: index management and ingestion.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::EmbeddingClient;
use crate::openai::get_embedding;
use crate::server::{ApiError, AppState};
use crate::store::SearchStore;

/// Longest index name the cluster accepts, in bytes.
const MAX_INDEX_NAME_LEN: usize = 255;

const FORBIDDEN_INDEX_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

/// Check an index name against the cluster's naming rules.
pub fn validate_index_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(RagError::InvalidRequest(format!(
            "Invalid index name [{}]: {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_INDEX_NAME_LEN {
        return invalid("must be at most 255 bytes");
    }
    if name == "." || name == ".." {
        return invalid("must not be '.' or '..'");
    }
    if name.starts_with(['_', '-', '+']) {
        return invalid("must not start with '_', '-' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if name.contains(FORBIDDEN_INDEX_CHARS) {
        return invalid("contains a forbidden character");
    }
    Ok(())
}

/// Create an index and its vector mapping.
///
/// Fails with `InvalidRequest` when the index already exists.
pub async fn create_index(store: &dyn SearchStore, name: &str) -> Result<bool> {
    validate_index_name(name)?;
    let already_exists = || RagError::InvalidRequest(format!("Index [{}] already exists", name));
    if store.index_exists(name).await? {
        return Err(already_exists());
    }

    let created = store.create_index(name).await.map_err(|e| {
        if e.is_already_exists() {
            already_exists()
        } else {
            e
        }
    })?;
    let mapped = store.create_mapping(name).await?;
    tracing::info!(index = name, created, mapped, "Index created");
    Ok(created && mapped)
}

/// Embed `content` and store it in `index`, creating the index on first use.
///
/// Returns the generated document id.
pub async fn ingest(
    embeddings: &dyn EmbeddingClient,
    store: &dyn SearchStore,
    index: &str,
    content: &str,
) -> Result<String> {
    validate_index_name(index)?;
    if content.trim().is_empty() {
        return Err(RagError::InvalidRequest(
            "Document content must not be empty".to_string(),
        ));
    }

    let embedding = get_embedding(content, embeddings).await?;
    if store.ensure_index(index).await? {
        tracing::info!(index = index, "Created index on first ingest");
    }
    let id = store.add_document(index, &embedding, content).await?;

    tracing::info!(index = index, id = %id, chars = content.len(), "Document ingested");
    Ok(id)
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateIndexRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct IndexAck {
    pub index: String,
    pub acknowledged: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexStatus {
    pub index: String,
    pub exists: bool,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub index: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub id: String,
    pub index: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub content: String,
}

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/indexes", post(handle_create_index))
        .route(
            "/indexes/{name}",
            get(handle_index_status).delete(handle_delete_index),
        )
        .route("/indexes/{name}/documents/{id}", get(handle_get_document))
        .route("/documents", post(handle_ingest))
}

/// Handle POST /api/indexes
async fn handle_create_index(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateIndexRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let acknowledged = create_index(state.deps.store.as_ref(), &request.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(IndexAck {
            index: request.name,
            acknowledged,
        }),
    ))
}

/// Handle GET /api/indexes/{name}
async fn handle_index_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<IndexStatus>, ApiError> {
    validate_index_name(&name)?;
    let exists = state.deps.store.index_exists(&name).await?;
    Ok(Json(IndexStatus { index: name, exists }))
}

/// Handle DELETE /api/indexes/{name}
async fn handle_delete_index(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<IndexAck>, ApiError> {
    validate_index_name(&name)?;
    let acknowledged = state.deps.store.delete_index(&name).await?;
    Ok(Json(IndexAck {
        index: name,
        acknowledged,
    }))
}

/// Handle POST /api/documents
async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let index = request
        .index
        .unwrap_or_else(|| state.pipeline.default_index.clone());
    let id = ingest(
        state.deps.embeddings.as_ref(),
        state.deps.store.as_ref(),
        &index,
        &request.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(IngestResponse { id, index })))
}

/// Handle GET /api/indexes/{name}/documents/{id}
async fn handle_get_document(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> std::result::Result<Json<DocumentResponse>, ApiError> {
    validate_index_name(&name)?;
    let doc = state.deps.store.get_document(&name, &id).await?;
    Ok(Json(DocumentResponse {
        id: doc.id,
        content: doc.content,
    }))
}
