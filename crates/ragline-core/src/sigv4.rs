//! AWS credentials and Signature Version 4 request signing.
//!
//! Search-store requests are signed with region-scoped credentials resolved
//! through the default AWS provider chain. Signing itself is delegated to
//! `aws-sigv4`.

use std::time::SystemTime;

use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SigningParams, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::Url;

use crate::error::{RagError, Result};

/// Provider name reported for credentials built from explicit values.
const STATIC_PROVIDER: &str = "ragline-static";

/// Load the shared AWS configuration for a region.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    /// Create static credentials.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token (temporary credentials).
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Resolve credentials from the provider chain of a loaded SDK config
    /// (environment, shared profile, web identity, instance metadata).
    pub async fn from_sdk_config(sdk_config: &SdkConfig) -> Result<Self> {
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| RagError::Config("No AWS credentials provider configured".to_string()))?;

        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| RagError::Config(format!("Failed to resolve AWS credentials: {}", e)))?;

        tracing::debug!(region = ?sdk_config.region(), "Resolved AWS credentials");

        Ok(Self {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().map(str::to_string),
        })
    }

    fn to_sdk(&self) -> Credentials {
        Credentials::new(
            &self.access_key_id,
            &self.secret_access_key,
            self.session_token.clone(),
            None,
            STATIC_PROVIDER,
        )
    }
}

/// Signs HTTP requests for one AWS service in one region.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    /// Create a signer.
    pub fn new(
        credentials: AwsCredentials,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// Compute the headers to attach to a request.
    ///
    /// Returns the `extra` headers (lowercased, and covered by the signature)
    /// followed by `x-amz-date`, the optional `x-amz-security-token` and
    /// `authorization`. The `host` header is signed from the URL and left to
    /// the HTTP client.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        extra: &[(&str, &str)],
        payload: &[u8],
        time: SystemTime,
    ) -> Result<Vec<(String, String)>> {
        let identity: Identity = self.credentials.to_sdk().into();
        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(&self.service)
            .time(time)
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| RagError::Internal(format!("Invalid signing parameters: {}", e)))?
            .into();

        let request = SignableRequest::new(
            method,
            url.as_str(),
            extra.iter().copied(),
            SignableBody::Bytes(payload),
        )
        .map_err(|e| RagError::InvalidRequest(format!("Cannot sign request to {}: {}", url, e)))?;

        let (instructions, _signature) = sign(request, &params)
            .map_err(|e| RagError::Internal(format!("Failed to sign request: {}", e)))?
            .into_parts();

        let mut headers: Vec<(String, String)> = extra
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();
        headers.extend(
            instructions
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        Ok(headers)
    }
}
