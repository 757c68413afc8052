//! REST routes under `/api`.
//!
//! - [`documents`]: index management and document ingestion
//! - [`responses`]: retrieval-augmented answers
//! - [`classifier`]: query classification

pub mod classifier;
pub mod documents;
pub mod responses;

use axum::Router;
use std::sync::Arc;

use crate::server::AppState;

/// All API routes, relative to `/api`.
pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(documents::routes())
        .merge(responses::routes())
        .merge(classifier::routes())
}
