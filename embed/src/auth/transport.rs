//! Backend broker transport

use crate::config::AuthConfig;
use crate::error::TransportError;
use crate::protocol::{BackendStatus, RefreshResponse};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

/// Network seam of the auth session.
///
/// Implementations issue exactly one request per call; retries and
/// timeouts are applied by the session manager.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// `GET /api/oauth/status`
    async fn status(&self) -> Result<BackendStatus, TransportError>;

    /// `POST /api/oauth/refresh`
    async fn refresh(&self) -> Result<RefreshResponse, TransportError>;
}

/// `BackendTransport` over HTTP
#[derive(Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the broker at `base_url` (e.g. `https://broker.example.com`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http_client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(http_client, config.backend_base_url.as_str()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn oauth_url(&self, endpoint: &str) -> String {
        format!("{}/api/oauth/{}", self.base_url, endpoint)
    }

    /// Decode a broker response.
    ///
    /// The broker reports provider failures in 4xx bodies, so anything
    /// below 500 is decoded; 5xx becomes a transient `Http` error.
    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let status = response.status();
        let body = response.text().await?;
        debug!(endpoint, status = status.as_u16(), "Broker responded");

        if status.is_server_error() {
            error!(endpoint, status = status.as_u16(), "Broker server error");
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                TransportError::Decode(e.to_string())
            } else {
                TransportError::Http {
                    status: status.as_u16(),
                    body: truncate(&body),
                }
            }
        })
    }
}

#[async_trait]
impl BackendTransport for HttpBackend {
    async fn status(&self) -> Result<BackendStatus, TransportError> {
        let url = self.oauth_url("status");
        debug!(url = %url, "Fetching auth status");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::decode("status", response).await
    }

    async fn refresh(&self) -> Result<RefreshResponse, TransportError> {
        let url = self.oauth_url("refresh");
        debug!(url = %url, "Requesting auth refresh");

        let response = self
            .http_client
            .post(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::decode("refresh", response).await
    }
}

const MAX_ERROR_BODY: usize = 256;

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
