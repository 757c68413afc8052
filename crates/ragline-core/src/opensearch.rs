//! OpenSearch-backed search store.
//!
//! Requests go to an Amazon OpenSearch Service domain over HTTPS and are
//! signed with SigV4 (service `es`). The domain endpoint is resolved through a
//! [`DomainDirectory`]: the OpenSearch Service SDK in production, a fixed
//! table for local clusters and tests.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_opensearch::error::DisplayErrorContext;
use reqwest::{Client, Method, Response, StatusCode, Url, header};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::error::{RagError, Result};
use crate::sigv4::{AwsCredentials, SigV4Signer};
use crate::store::{
    CONTENT_FIELD, EMBEDDING_FIELD, SearchStore, document_body, index_mapping, index_settings,
    knn_query,
};
use crate::types::{SearchHit, StoredDocument};

/// SigV4 service name for OpenSearch Service.
pub const SIGNING_SERVICE: &str = "es";

/// Request timeout for cluster calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Domain directory
// ============================================================================

/// Resolves a domain name to its cluster endpoint.
#[async_trait]
pub trait DomainDirectory: Send + Sync {
    /// Return the endpoint host (or full base URL) of a domain.
    async fn endpoint(&self, domain: &str, region: &str) -> Result<String>;
}

/// Looks domains up through the OpenSearch Service configuration API.
pub struct AwsDomainDirectory {
    client: aws_sdk_opensearch::Client,
}

impl AwsDomainDirectory {
    /// Create a directory from a loaded SDK config.
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_opensearch::Client::new(sdk_config),
        }
    }

    /// Create a directory that sends configuration API calls to `url`.
    pub fn with_endpoint_url(sdk_config: &SdkConfig, url: impl Into<String>) -> Self {
        let config = aws_sdk_opensearch::config::Builder::from(sdk_config)
            .endpoint_url(url)
            .build();
        Self {
            client: aws_sdk_opensearch::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl DomainDirectory for AwsDomainDirectory {
    async fn endpoint(&self, domain: &str, _region: &str) -> Result<String> {
        let output = self
            .client
            .describe_domain()
            .domain_name(domain)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    return RagError::NotFound(format!("OpenSearch domain {}", domain));
                }
                let message = DisplayErrorContext(&err).to_string();
                match err.raw_response().map(|r| r.status().as_u16()) {
                    Some(status) => RagError::upstream(status, message),
                    None => RagError::Network(message),
                }
            })?;

        let status = output.domain_status().ok_or_else(|| {
            RagError::Serialization(format!("Describe response for {} has no DomainStatus", domain))
        })?;
        let endpoint = status
            .endpoint()
            .map(str::to_string)
            .or_else(|| status.endpoints().and_then(|e| e.get("vpc").cloned()))
            .ok_or_else(|| {
                RagError::Config(format!("OpenSearch domain {} has no endpoint yet", domain))
            })?;

        tracing::debug!(domain = domain, endpoint = %endpoint, "Resolved OpenSearch endpoint");
        Ok(endpoint)
    }
}

/// A directory with fixed endpoints, for local clusters and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticDomainDirectory {
    endpoints: HashMap<String, String>,
}

impl StaticDomainDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain endpoint.
    pub fn with_domain(mut self, domain: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(domain.into(), endpoint.into());
        self
    }
}

#[async_trait]
impl DomainDirectory for StaticDomainDirectory {
    async fn endpoint(&self, domain: &str, _region: &str) -> Result<String> {
        self.endpoints
            .get(domain)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("OpenSearch domain {}", domain)))
    }
}

// ============================================================================
// Cluster client
// ============================================================================

/// A SigV4-signing OpenSearch client.
pub struct OpenSearchClient {
    client: Client,
    base_url: Url,
    signer: SigV4Signer,
}

impl OpenSearchClient {
    /// Create a client for an explicit endpoint.
    ///
    /// A bare host is treated as `https://{host}:443`.
    pub fn new(endpoint: &str, signer: SigV4Signer) -> Result<Self> {
        let base = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{}:443", endpoint)
        };
        let base_url = Url::parse(&base)
            .map_err(|e| RagError::Config(format!("Invalid OpenSearch endpoint {}: {}", base, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| RagError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            signer,
        })
    }

    /// Resolve a domain's endpoint and build a signed client for it.
    pub async fn for_domain(
        directory: &dyn DomainDirectory,
        domain: &str,
        region: &str,
        credentials: AwsCredentials,
    ) -> Result<Self> {
        let endpoint = directory.endpoint(domain, region).await?;
        let client = Self::new(
            &endpoint,
            SigV4Signer::new(credentials, region, SIGNING_SERVICE),
        )?;
        tracing::info!(domain = domain, region = region, endpoint = %endpoint, "OpenSearch client initialised");
        Ok(client)
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    /// Host of the cluster endpoint.
    pub fn host(&self) -> Option<&str> {
        self.base_url.host_str()
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| RagError::InvalidRequest(format!("Invalid request path {}: {}", path, e)))
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = self.url(path)?;
        let payload = match body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        let extra: &[(&str, &str)] = if body.is_some() {
            &[("content-type", "application/json")]
        } else {
            &[]
        };

        let headers =
            self.signer
                .sign(method.as_str(), &url, extra, &payload, SystemTime::now())?;

        tracing::debug!(method = %method, url = %url, "Sending OpenSearch request");

        let mut request = self.client.request(method, url);
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        if body.is_some() {
            request = request.body(payload);
        }
        Ok(request.send().await?)
    }

    async fn send_json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.send(method, path, body).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}

fn index_path(index: &str) -> String {
    format!("/{}", urlencoding::encode(index))
}

fn acknowledged(body: &Value) -> bool {
    body.get("acknowledged")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Translate an OpenSearch error response.
///
/// A 404 is the store confirming absence; everything else keeps its status.
async fn error_from_response(response: Response) -> RagError {
    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    let body = response.text().await.unwrap_or_default();

    let message = if is_json {
        serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| error_message(&v))
            .unwrap_or(body)
    } else {
        body
    };

    if status == StatusCode::NOT_FOUND {
        RagError::NotFound(message)
    } else {
        RagError::upstream(status.as_u16(), message)
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(s) => Some(s.clone()),
        error => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = error.get("reason").and_then(Value::as_str).unwrap_or("");
            Some(format!("{}: {}", kind, reason))
        }
    }
}

#[async_trait]
impl SearchStore for OpenSearchClient {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.send(Method::HEAD, &index_path(index), None).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RagError::upstream(
                status.as_u16(),
                format!("Unexpected status checking index {}", index),
            )),
        }
    }

    async fn create_index(&self, index: &str) -> Result<bool> {
        let body = self
            .send_json(Method::PUT, &index_path(index), Some(&index_settings()))
            .await?;
        Ok(acknowledged(&body))
    }

    async fn create_mapping(&self, index: &str) -> Result<bool> {
        let path = format!("{}/_mapping", index_path(index));
        let body = self
            .send_json(Method::PUT, &path, Some(&index_mapping()))
            .await?;
        Ok(acknowledged(&body))
    }

    async fn try_delete_index(&self, index: &str) -> Result<bool> {
        let body = self
            .send_json(Method::DELETE, &index_path(index), None)
            .await?;
        Ok(acknowledged(&body))
    }

    async fn add_document(
        &self,
        index: &str,
        embedding: &[f32],
        content: &str,
    ) -> Result<String> {
        let path = format!("{}/_doc", index_path(index));
        let body = self
            .send_json(Method::POST, &path, Some(&document_body(embedding, content)))
            .await?;

        body.get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RagError::Serialization("Index response missing _id".to_string()))
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<StoredDocument> {
        let path = format!("{}/_doc/{}", index_path(index), urlencoding::encode(id));
        let body = self.send_json(Method::GET, &path, None).await?;

        let source = body
            .get("_source")
            .ok_or_else(|| RagError::NotFound(format!("document [{}] in index [{}]", id, index)))?;

        Ok(StoredDocument {
            id: id.to_string(),
            content: source
                .get(CONTENT_FIELD)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            embedding: source
                .get(EMBEDDING_FIELD)
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    async fn knn_search(&self, index: &str, vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let path = format!("{}/_search", index_path(index));
        let body = self
            .send_json(Method::POST, &path, Some(&knn_query(vector, k)))
            .await?;

        let hits = body
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(hits
            .iter()
            .filter_map(|hit| {
                Some(SearchHit {
                    id: hit.get("_id")?.as_str()?.to_string(),
                    score: hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    content: hit
                        .pointer(&format!("/_source/{}", CONTENT_FIELD))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    fn name(&self) -> &str {
        "opensearch"
    }
}
