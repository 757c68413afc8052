//! Query classification.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::ChatClient;
use crate::prompts::CLASSIFIER_SYSTEM_PROMPT;
use crate::server::{ApiError, AppState};
use crate::types::{ChatRequest, QueryCategory};

/// Ask the chat model which category `query` belongs to.
///
/// Output that is not one of the known labels is treated as
/// [`QueryCategory::Unsupported`].
pub async fn classify(chat: &dyn ChatClient, query: &str) -> Result<QueryCategory> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidRequest(
            "Query must not be empty".to_string(),
        ));
    }

    let completion = chat
        .complete(ChatRequest::with_system(CLASSIFIER_SYSTEM_PROMPT, query.trim()))
        .await?;

    let category = match QueryCategory::parse_label(&completion.content) {
        Some(category) => category,
        None => {
            tracing::warn!(output = %completion.content, "Unrecognised classifier output");
            QueryCategory::Unsupported
        }
    };

    tracing::debug!(category = %category, "Query classified");
    Ok(category)
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub query: String,
    pub category: QueryCategory,
}

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/classify", post(handle_classify))
}

/// Handle POST /api/classify
async fn handle_classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> std::result::Result<Json<ClassifyResponse>, ApiError> {
    let category = classify(state.deps.chat.as_ref(), &request.query).await?;
    Ok(Json(ClassifyResponse {
        query: request.query,
        category,
    }))
}
