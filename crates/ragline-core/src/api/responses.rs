//! Response generation: moderate, retrieve, answer.

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::documents::validate_index_name;
use crate::error::{RagError, Result};
use crate::models::ChatClient;
use crate::openai::{get_embedding, moderate_user_message};
use crate::prompts::{ANSWER_SYSTEM_PROMPT, answer_prompt};
use crate::server::{ApiError, AppDeps, AppState};
use crate::store::SearchStore;
use crate::types::ChatRequest;

/// Upper bound on passages retrieved for one question.
pub const MAX_TOP_K: usize = 20;

/// A retrieved passage that contributed to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub score: f32,
}

/// A generated answer and the passages it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub response: String,
    pub sources: Vec<Source>,
}

/// Answer `query` from the `top_k` nearest passages in `index`.
///
/// `index` must be a single concrete index name; wildcards and `_all` are
/// rejected. The query is moderated before any model call; a flagged query
/// is rejected with [`RagError::Moderation`] and never reaches the embedding
/// or chat models.
pub async fn generate(
    deps: &AppDeps,
    index: &str,
    query: &str,
    top_k: usize,
) -> Result<GeneratedResponse> {
    validate_index_name(index)?;
    if query.trim().is_empty() {
        return Err(RagError::InvalidRequest(
            "Query must not be empty".to_string(),
        ));
    }
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(RagError::InvalidRequest(format!(
            "top_k must be between 1 and {}, got {}",
            MAX_TOP_K, top_k
        )));
    }

    let verdict = moderate_user_message(deps.moderation.as_ref(), query).await?;
    if verdict.flagged {
        tracing::warn!(categories = ?verdict.categories, "Query rejected by moderation");
        let reason = if verdict.categories.is_empty() {
            "flagged".to_string()
        } else {
            verdict.categories.join(", ")
        };
        return Err(RagError::Moderation(reason));
    }

    let embedding = get_embedding(query, deps.embeddings.as_ref()).await?;
    let passages = deps.store.knn_search(index, &embedding, top_k).await?;
    tracing::debug!(index = index, retrieved = passages.len(), "Passages retrieved");

    let request = ChatRequest::with_system(ANSWER_SYSTEM_PROMPT, answer_prompt(query, &passages));
    let completion = deps.chat.complete(request).await?;

    tracing::info!(
        index = index,
        sources = passages.len(),
        prompt_tokens = completion.usage.prompt_tokens,
        completion_tokens = completion.usage.completion_tokens,
        "Response generated"
    );

    Ok(GeneratedResponse {
        response: completion.content,
        sources: passages
            .into_iter()
            .map(|hit| Source {
                id: hit.id,
                score: hit.score,
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub query: String,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/responses", post(handle_generate))
}

/// Handle POST /api/responses
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> std::result::Result<Json<GeneratedResponse>, ApiError> {
    let index = request
        .index
        .as_deref()
        .unwrap_or(&state.pipeline.default_index);
    let top_k = request.top_k.unwrap_or(state.pipeline.top_k);

    let response = generate(&state.deps, index, &request.query, top_k).await?;
    Ok(Json(response))
}
