//! HTTP mock of the hosted services the gateway talks to.
//!
//! One local server answers three families of requests:
//!
//! - `/v1/embeddings`, `/v1/chat/completions`, `/v1/moderations` (OpenAI)
//! - `/2021-01-01/opensearch/domain/{name}` (domain configuration API)
//! - `/{index}`, `/{index}/_mapping`, `/{index}/_doc`, `/{index}/_search`
//!   (OpenSearch cluster, backed by [`InMemorySearchStore`])

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, head, post, put},
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::RagError;
use crate::models::MockEmbeddingClient;
use crate::store::{CONTENT_FIELD, EMBEDDING_FIELD, InMemorySearchStore, SearchStore};
use crate::types::{EMBEDDING_DIMENSION, Embedding};

/// API key the mock accepts.
pub const MOCK_API_KEY: &str = "sk-test";

/// Moderation categories reported on every verdict.
const MODERATION_CATEGORIES: &[&str] = &["harassment", "hate", "self-harm", "sexual", "violence"];

/// Injected failures: remaining count and status to answer with.
#[derive(Debug, Default, Clone, Copy)]
struct FailurePlan {
    remaining: usize,
    status: u16,
}

impl FailurePlan {
    fn take(&mut self) -> Option<StatusCode> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        StatusCode::from_u16(self.status).ok()
    }
}

#[derive(Default)]
struct MockState {
    store: InMemorySearchStore,
    domains: Mutex<HashMap<String, Value>>,
    chat_responses: Mutex<VecDeque<String>>,
    chat_failures: Mutex<FailurePlan>,
    store_failures: Mutex<FailurePlan>,
    blocked_terms: Mutex<Vec<(String, String)>>,
    openai_requests: Mutex<Vec<Value>>,
    store_authorizations: Mutex<Vec<String>>,
}

/// A local HTTP server standing in for OpenAI and Amazon OpenSearch Service.
///
/// # Example
///
/// ```ignore
/// use ragline_core::testing::MockServices;
///
/// let server = MockServices::start().await;
/// server.queue_chat_response("Hello!");
///
/// let config = OpenAIConfig::new("sk-test").with_base_url(server.url());
/// // ... build clients against server.url()
///
/// server.shutdown().await;
/// ```
pub struct MockServices {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServices {
    /// Start a new mock server on a random available port.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/v1/embeddings", post(handle_embeddings))
            .route("/v1/chat/completions", post(handle_chat))
            .route("/v1/moderations", post(handle_moderation))
            .route(
                "/2021-01-01/opensearch/domain/{name}",
                get(handle_describe_domain),
            )
            .route(
                "/{index}",
                head(handle_index_exists)
                    .put(handle_create_index)
                    .delete(handle_delete_index),
            )
            .route("/{index}/_mapping", put(handle_put_mapping))
            .route("/{index}/_doc", post(handle_add_document))
            .route("/{index}/_doc/{id}", get(handle_get_document))
            .route("/{index}/_search", post(handle_search))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Get the server's base URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    // ------------------------------------------------------------------
    // OpenAI
    // ------------------------------------------------------------------

    /// Queue the text of the next chat completion.
    pub fn queue_chat_response(&self, text: &str) {
        lock(&self.state.chat_responses).push_back(text.to_string());
    }

    /// Answer the next `count` chat requests with `status`.
    pub fn fail_next_chat_requests(&self, count: usize, status: u16) {
        *lock(&self.state.chat_failures) = FailurePlan {
            remaining: count,
            status,
        };
    }

    /// Flag moderation input containing `term` under `category`.
    pub fn block_term(&self, term: &str, category: &str) {
        lock(&self.state.blocked_terms).push((term.to_lowercase(), category.to_string()));
    }

    /// Bodies of every authenticated OpenAI request, failed attempts included.
    pub fn captured_openai_requests(&self) -> Vec<Value> {
        lock(&self.state.openai_requests).clone()
    }

    // ------------------------------------------------------------------
    // Domain configuration API
    // ------------------------------------------------------------------

    /// Register a public domain endpoint.
    pub fn register_domain(&self, name: &str, endpoint: &str) {
        let mut status = domain_status(name);
        status["Endpoint"] = json!(endpoint);
        lock(&self.state.domains).insert(name.to_string(), json!({ "DomainStatus": status }));
    }

    /// Register a VPC domain, which reports its endpoint under `Endpoints.vpc`.
    pub fn register_vpc_domain(&self, name: &str, endpoint: &str) {
        let mut status = domain_status(name);
        status["Endpoints"] = json!({ "vpc": endpoint });
        lock(&self.state.domains).insert(name.to_string(), json!({ "DomainStatus": status }));
    }

    // ------------------------------------------------------------------
    // Cluster
    // ------------------------------------------------------------------

    /// Answer the next `count` cluster requests with `status`.
    pub fn fail_next_store_requests(&self, count: usize, status: u16) {
        *lock(&self.state.store_failures) = FailurePlan {
            remaining: count,
            status,
        };
    }

    /// `Authorization` headers of cluster requests, in arrival order.
    pub fn store_authorizations(&self) -> Vec<String> {
        lock(&self.state.store_authorizations).clone()
    }

    /// Documents stored in an index.
    pub fn document_count(&self, index: &str) -> usize {
        self.state.store.document_count(index)
    }

    /// Shutdown the server.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// OpenAI handlers
// ============================================================================

fn openai_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "message": message,
                "type": "invalid_request_error"
            }
        })),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        == Some(MOCK_API_KEY)
}

/// Authenticate and record an OpenAI request.
fn accept_openai(state: &MockState, headers: &HeaderMap, body: &Value) -> Option<Response> {
    if !authorized(headers) {
        return Some(openai_error(
            StatusCode::UNAUTHORIZED,
            "Incorrect API key provided",
        ));
    }
    lock(&state.openai_requests).push(body.clone());
    None
}

/// Handle POST /v1/embeddings
async fn handle_embeddings(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = accept_openai(&state, &headers, &body) {
        return rejection;
    }

    let Some(input) = body.get("input").and_then(Value::as_str) else {
        return openai_error(StatusCode::BAD_REQUEST, "input must be a string");
    };
    let dimensions = body
        .get("dimensions")
        .and_then(Value::as_u64)
        .map_or(EMBEDDING_DIMENSION, |d| d as usize);
    let embedding = MockEmbeddingClient::with_dimensions(dimensions).vector_for(input);

    Json(json!({
        "object": "list",
        "data": [{"object": "embedding", "index": 0, "embedding": embedding}],
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "usage": {"prompt_tokens": input.split_whitespace().count(), "total_tokens": input.split_whitespace().count()}
    }))
    .into_response()
}

/// Handle POST /v1/chat/completions
async fn handle_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = accept_openai(&state, &headers, &body) {
        return rejection;
    }

    if let Some(status) = lock(&state.chat_failures).take() {
        return openai_error(status, "The server had an error while processing your request");
    }

    let Some(text) = lock(&state.chat_responses).pop_front() else {
        return openai_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "MockServices: no more chat responses available",
        );
    };

    Json(json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

/// Handle POST /v1/moderations
async fn handle_moderation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = accept_openai(&state, &headers, &body) {
        return rejection;
    }

    let input = body
        .get("input")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    let mut categories: serde_json::Map<String, Value> = MODERATION_CATEGORIES
        .iter()
        .map(|c| (c.to_string(), Value::Bool(false)))
        .collect();
    for (term, category) in lock(&state.blocked_terms).iter() {
        if input.contains(term.as_str()) {
            categories.insert(category.clone(), Value::Bool(true));
        }
    }
    let flagged = categories.values().any(|v| v == &Value::Bool(true));

    Json(json!({
        "id": format!("modr-{}", uuid::Uuid::new_v4().simple()),
        "model": "omni-moderation-latest",
        "results": [{"flagged": flagged, "categories": categories}]
    }))
    .into_response()
}

// ============================================================================
// Domain configuration handler
// ============================================================================

/// Fields every `DomainStatus` carries.
fn domain_status(name: &str) -> Value {
    json!({
        "DomainId": format!("123456789012/{}", name),
        "DomainName": name,
        "ARN": format!("arn:aws:es:us-east-1:123456789012:domain/{}", name),
        "Created": true,
        "Deleted": false,
        "Processing": false,
        "ClusterConfig": {}
    })
}

/// Handle GET /2021-01-01/opensearch/domain/{name}
async fn handle_describe_domain(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
) -> Response {
    match lock(&state.domains).get(&name) {
        Some(status) => Json(status.clone()).into_response(),
        None => (
            StatusCode::CONFLICT,
            [("x-amzn-errortype", "ResourceNotFoundException")],
            Json(json!({"message": format!("Domain not found: {}", name)})),
        )
            .into_response(),
    }
}

// ============================================================================
// Cluster handlers
// ============================================================================

fn cluster_error(status: StatusCode, kind: &str, reason: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {"type": kind, "reason": reason},
            "status": status.as_u16()
        })),
    )
        .into_response()
}

/// Render a store error the way the cluster reports it.
fn store_error(err: RagError) -> Response {
    match err {
        RagError::NotFound(reason) => {
            cluster_error(StatusCode::NOT_FOUND, "index_not_found_exception", &reason)
        }
        RagError::Upstream { status, message } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            let (kind, reason) = message
                .split_once(": ")
                .unwrap_or(("exception", message.as_str()));
            cluster_error(status, kind, reason)
        }
        other => cluster_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "exception",
            &other.to_string(),
        ),
    }
}

/// Record a cluster request and apply any injected failure.
fn accept_store(state: &MockState, headers: &HeaderMap) -> Option<Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    lock(&state.store_authorizations).push(authorization);

    lock(&state.store_failures)
        .take()
        .map(|status| cluster_error(status, "injected_failure", "mock failure"))
}

/// Handle HEAD /{index}
async fn handle_index_exists(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }
    match state.store.index_exists(&index).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle PUT /{index}
async fn handle_create_index(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }
    match state.store.create_index(&index).await {
        Ok(acknowledged) => Json(json!({
            "acknowledged": acknowledged,
            "shards_acknowledged": acknowledged,
            "index": index
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle PUT /{index}/_mapping
async fn handle_put_mapping(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }
    match state.store.create_mapping(&index).await {
        Ok(acknowledged) => Json(json!({"acknowledged": acknowledged})).into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle DELETE /{index}
async fn handle_delete_index(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }
    match state.store.try_delete_index(&index).await {
        Ok(acknowledged) => Json(json!({"acknowledged": acknowledged})).into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle POST /{index}/_doc
async fn handle_add_document(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }

    let embedding: Embedding = match body
        .get(EMBEDDING_FIELD)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(embedding) => embedding.unwrap_or_default(),
        Err(e) => {
            return cluster_error(
                StatusCode::BAD_REQUEST,
                "mapper_parsing_exception",
                &e.to_string(),
            );
        }
    };
    let content = body
        .get(CONTENT_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default();

    match state.store.add_document(&index, &embedding, content).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({"_index": index, "_id": id, "result": "created"})),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle GET /{index}/_doc/{id}
async fn handle_get_document(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path((index, id)): Path<(String, String)>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }

    match state.store.index_exists(&index).await {
        Ok(true) => {}
        Ok(false) => {
            return store_error(RagError::NotFound(format!("no such index [{}]", index)));
        }
        Err(e) => return store_error(e),
    }

    match state.store.get_document(&index, &id).await {
        Ok(doc) => Json(json!({
            "_index": index,
            "_id": doc.id,
            "found": true,
            "_source": {
                EMBEDDING_FIELD: doc.embedding,
                CONTENT_FIELD: doc.content
            }
        }))
        .into_response(),
        Err(RagError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"_index": index, "_id": id, "found": false})),
        )
            .into_response(),
        Err(e) => store_error(e),
    }
}

/// Handle POST /{index}/_search
async fn handle_search(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejection) = accept_store(&state, &headers) {
        return rejection;
    }

    let knn = body.pointer(&format!("/query/knn/{}", EMBEDDING_FIELD));
    let vector: Embedding = match knn
        .and_then(|q| q.get("vector"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(Some(vector)) => vector,
        _ => {
            return cluster_error(
                StatusCode::BAD_REQUEST,
                "parsing_exception",
                "knn query requires a vector",
            );
        }
    };
    let k = knn
        .and_then(|q| q.get("k"))
        .and_then(Value::as_u64)
        .unwrap_or(10) as usize;
    let size = body.get("size").and_then(Value::as_u64).map_or(k, |s| s as usize);

    match state.store.knn_search(&index, &vector, k.min(size)).await {
        Ok(hits) => {
            let hits: Vec<Value> = hits
                .into_iter()
                .map(|hit| {
                    json!({
                        "_index": index,
                        "_id": hit.id,
                        "_score": hit.score,
                        "_source": {CONTENT_FIELD: hit.content}
                    })
                })
                .collect();
            Json(json!({
                "took": 1,
                "timed_out": false,
                "hits": {
                    "total": {"value": hits.len(), "relation": "eq"},
                    "hits": hits
                }
            }))
            .into_response()
        }
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_services_start_and_shutdown() {
        let server = MockServices::start().await;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_unknown_api_key() {
        let server = MockServices::start().await;

        let response = reqwest::Client::new()
            .post(format!("{}/v1/embeddings", server.url()))
            .bearer_auth("nope")
            .json(&json!({"model": "m", "input": "hi"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"]["message"].is_string());
        assert!(server.captured_openai_requests().is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_domain_reports_resource_not_found() {
        let server = MockServices::start().await;

        let response = reqwest::Client::new()
            .get(format!("{}/2021-01-01/opensearch/domain/absent", server.url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 409);
        assert_eq!(
            response.headers()["x-amzn-errortype"],
            "ResourceNotFoundException"
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_index_error_shape() {
        let server = MockServices::start().await;

        let response = reqwest::Client::new()
            .delete(format!("{}/ghost", server.url()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["type"], "index_not_found_exception");

        server.shutdown().await;
    }

    #[test]
    fn test_failure_plan_counts_down() {
        let mut plan = FailurePlan {
            remaining: 2,
            status: 503,
        };
        assert_eq!(plan.take(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(plan.take(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(plan.take(), None);
    }
}
