//! reqwest-backed transport with a shared connection pool

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use std::time::Duration;
use tracing::{debug, info};

use super::{Endpoint, RawResponse, RequestPayload, Transport, TransportFailure};
use crate::config::AuthzConfig;
use crate::error::{AuthorizationError, Result};

/// Longest error body kept for diagnostics
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport to the authorization service
///
/// One instance owns one connection pool; clone the surrounding resolver
/// rather than building several transports.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &AuthzConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(secret) = config.shared_secret() {
            let name = HeaderName::from_bytes(config.shared_secret_header().as_bytes())
                .map_err(|e| AuthorizationError::Internal(format!("invalid secret header: {}", e)))?;
            let mut value = HeaderValue::from_str(secret)
                .map_err(|e| AuthorizationError::Internal(format!("invalid shared secret: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls())
            .build()
            .map_err(|e| AuthorizationError::Internal(format!("failed to build HTTP client: {}", e)))?;

        if !config.verify_tls() {
            info!("TLS certificate verification disabled for {}", config.base_url());
        }

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: Endpoint,
        payload: &RequestPayload,
        timeout: Duration,
    ) -> std::result::Result<RawResponse, TransportFailure> {
        let response = self
            .client
            .post(self.url(endpoint))
            .timeout(timeout)
            .bearer_auth(payload.token())
            .json(payload)
            .send()
            .await
            .map_err(network_failure)?;

        let status = response.status();
        debug!("POST {} -> {}", endpoint.path(), status);

        if !status.is_success() {
            let body = response.text().await.ok().map(|mut text| {
                if text.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                text
            });
            return Err(TransportFailure::Status {
                code: status.as_u16(),
                body: body.filter(|b| !b.is_empty()),
            });
        }

        let bytes = response.bytes().await.map_err(network_failure)?;
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| TransportFailure::Decode(e.to_string()))?;

        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn network_failure(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::timeout(err.to_string())
    } else if err.is_decode() {
        TransportFailure::Decode(err.to_string())
    } else {
        TransportFailure::network(err.to_string())
    }
}
