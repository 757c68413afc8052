//! Search store abstraction.
//!
//! A [`SearchStore`] manages k-nearest-neighbor indices and the documents
//! written into them. The wire payloads used by OpenSearch are built here so
//! every implementation agrees on index settings and field layout.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{ALREADY_EXISTS_ERROR, RagError, Result};
use crate::types::{EMBEDDING_DIMENSION, Embedding, SearchHit, StoredDocument};

/// Similarity metric declared on every index.
pub const KNN_SPACE_TYPE: &str = "cosinesimil";

/// Name of the vector field.
pub const EMBEDDING_FIELD: &str = "embedding";

/// Name of the text field.
pub const CONTENT_FIELD: &str = "content";

/// Index settings enabling kNN search with cosine similarity.
pub fn index_settings() -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true,
                "knn.space_type": KNN_SPACE_TYPE
            }
        }
    })
}

/// Mapping declaring the vector field and the exact-match content field.
pub fn index_mapping() -> Value {
    json!({
        "properties": {
            EMBEDDING_FIELD: {
                "type": "knn_vector",
                "dimension": EMBEDDING_DIMENSION
            },
            CONTENT_FIELD: {
                "type": "keyword"
            }
        }
    })
}

/// Body of a single indexed document.
pub fn document_body(embedding: &[f32], content: &str) -> Value {
    json!({
        EMBEDDING_FIELD: embedding,
        CONTENT_FIELD: content
    })
}

/// Nearest-neighbor query returning the `k` closest documents.
pub fn knn_query(vector: &[f32], k: usize) -> Value {
    json!({
        "size": k,
        "_source": { "excludes": [EMBEDDING_FIELD] },
        "query": {
            "knn": {
                EMBEDDING_FIELD: {
                    "vector": vector,
                    "k": k
                }
            }
        }
    })
}

/// Index lifecycle and document operations against a vector store.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Whether the index exists. No side effects.
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create a kNN index. Fails if the index already exists.
    ///
    /// Returns the store's acknowledgement flag.
    async fn create_index(&self, index: &str) -> Result<bool>;

    /// Declare the vector and content fields on an index.
    ///
    /// Returns the store's acknowledgement flag.
    async fn create_mapping(&self, index: &str) -> Result<bool>;

    /// Delete an index, surfacing [`RagError::NotFound`] when it is absent.
    async fn try_delete_index(&self, index: &str) -> Result<bool>;

    /// Write one `{embedding, content}` record and return its identifier.
    async fn add_document(&self, index: &str, embedding: &[f32], content: &str)
    -> Result<String>;

    /// Read a document back by identifier.
    async fn get_document(&self, index: &str, id: &str) -> Result<StoredDocument>;

    /// Return the `k` documents closest to `vector`, best first.
    async fn knn_search(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Get the name of this store.
    fn name(&self) -> &str;

    /// Delete an index, treating a confirmed "not found" as success.
    ///
    /// Any other failure propagates.
    async fn delete_index(&self, index: &str) -> Result<bool> {
        tracing::info!(index = index, "Trying to delete index");
        match self.try_delete_index(index).await {
            Ok(acknowledged) => {
                tracing::info!(index = index, acknowledged, "Index deleted");
                Ok(acknowledged)
            }
            Err(RagError::NotFound(_)) => {
                tracing::info!(index = index, "Index not found, nothing to delete");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the index and its mapping if the index does not exist yet.
    ///
    /// Returns `true` when the index was created by this call. Losing a
    /// creation race to a concurrent caller is not an error: the mapping is
    /// applied again (it is idempotent) and `false` is returned.
    async fn ensure_index(&self, index: &str) -> Result<bool> {
        if self.index_exists(index).await? {
            return Ok(false);
        }

        let created = match self.create_index(index).await {
            Ok(acknowledged) => Some(acknowledged),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(index = index, "Index created concurrently");
                None
            }
            Err(e) => return Err(e),
        };
        let mapped = self.create_mapping(index).await?;
        if created.is_some_and(|created| !(created && mapped)) {
            tracing::warn!(
                index = index,
                created = ?created,
                mapped,
                "Index creation not acknowledged"
            );
        }
        Ok(created.is_some())
    }
}

/// A search store that can be shared across threads.
pub type SharedSearchStore = Arc<dyn SearchStore>;

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default)]
struct IndexState {
    dimension: Option<usize>,
    /// Documents in insertion order.
    documents: Vec<(String, Embedding, String)>,
}

/// An in-memory search store with the same observable semantics as
/// OpenSearch for the operations the gateway uses.
#[derive(Debug, Default)]
pub struct InMemorySearchStore {
    indices: RwLock<HashMap<String, IndexState>>,
}

impl InMemorySearchStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in an index (0 when absent).
    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .map(|indices| indices.get(index).map_or(0, |s| s.documents.len()))
            .unwrap_or(0)
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, IndexState>>> {
        self.indices
            .write()
            .map_err(|e| RagError::Internal(format!("Failed to acquire write lock: {}", e)))
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, IndexState>>> {
        self.indices
            .read()
            .map_err(|e| RagError::Internal(format!("Failed to acquire read lock: {}", e)))
    }
}

fn index_not_found(index: &str) -> RagError {
    RagError::NotFound(format!("no such index [{}]", index))
}

/// OpenSearch `cosinesimil` score: `1 / (2 - cos)`.
fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let cosine = if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    };
    1.0 / (2.0 - cosine)
}

#[async_trait]
impl SearchStore for InMemorySearchStore {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self.read_lock()?.contains_key(index))
    }

    async fn create_index(&self, index: &str) -> Result<bool> {
        let mut indices = self.write_lock()?;
        if indices.contains_key(index) {
            return Err(RagError::upstream(
                400,
                format!("{}: index [{}] already exists", ALREADY_EXISTS_ERROR, index),
            ));
        }
        indices.insert(index.to_string(), IndexState::default());
        Ok(true)
    }

    async fn create_mapping(&self, index: &str) -> Result<bool> {
        let mut indices = self.write_lock()?;
        let state = indices.get_mut(index).ok_or_else(|| index_not_found(index))?;
        state.dimension = Some(EMBEDDING_DIMENSION);
        Ok(true)
    }

    async fn try_delete_index(&self, index: &str) -> Result<bool> {
        let mut indices = self.write_lock()?;
        indices
            .remove(index)
            .map(|_| true)
            .ok_or_else(|| index_not_found(index))
    }

    async fn add_document(
        &self,
        index: &str,
        embedding: &[f32],
        content: &str,
    ) -> Result<String> {
        let mut indices = self.write_lock()?;
        // Writes to a missing index create it, as OpenSearch does by default.
        let state = indices.entry(index.to_string()).or_default();

        if let Some(dimension) = state.dimension {
            if embedding.len() != dimension {
                return Err(RagError::upstream(
                    400,
                    format!(
                        "mapper_parsing_exception: vector dimension mismatch. Expected: {}, Given: {}",
                        dimension,
                        embedding.len()
                    ),
                ));
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        state
            .documents
            .push((id.clone(), embedding.to_vec(), content.to_string()));
        Ok(id)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<StoredDocument> {
        let indices = self.read_lock()?;
        let state = indices.get(index).ok_or_else(|| index_not_found(index))?;
        state
            .documents
            .iter()
            .find(|(doc_id, _, _)| doc_id == id)
            .map(|(doc_id, embedding, content)| StoredDocument {
                id: doc_id.clone(),
                content: content.clone(),
                embedding: embedding.clone(),
            })
            .ok_or_else(|| RagError::NotFound(format!("document [{}] in index [{}]", id, index)))
    }

    async fn knn_search(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let indices = self.read_lock()?;
        let state = indices.get(index).ok_or_else(|| index_not_found(index))?;

        let mut hits: Vec<SearchHit> = state
            .documents
            .iter()
            .map(|(id, embedding, content)| SearchHit {
                id: id.clone(),
                score: cosine_score(vector, embedding),
                content: content.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
