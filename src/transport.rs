use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::BackendConfig;

/// Everything that can go wrong talking to the backend. Retry policy is
/// the scheduler's business; this layer reports and returns.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("backend unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("request timed out")]
    Timeout,
}

/// Read-only JSON transport against the dashboard backend.
///
/// `query` is ordered and may repeat keys (the map endpoint takes a
/// repeated `hide` parameter).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, TransportError>;
}

/// Production transport over reqwest with a bounded per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .map_err(|e| anyhow::anyhow!("invalid backend base_url {:?}: {e}", cfg.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self { client, base })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, TransportError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| TransportError::NetworkUnreachable(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::NetworkUnreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::MalformedBody(e.to_string())
            }
        })
    }
}
