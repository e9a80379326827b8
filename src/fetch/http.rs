//! Generic HTTP dataset fetcher
//!
//! Fetches a URL and hands the body to the cache as an opaque
//! `serde_json::Value`: parsed JSON when the body is JSON, otherwise the
//! body text as a JSON string. Provider-specific parsing happens downstream.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{FetchError, Fetcher};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// User agent sent to upstream APIs
const USER_AGENT: &str = concat!("finbot-cache/", env!("CARGO_PKG_VERSION"));

/// Fetcher performing a single GET request per refresh
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    url: String,
}

impl HttpFetcher {
    /// Creates a fetcher sharing an existing HTTP client
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

/// Builds an HTTP client with the timeout every fetcher should respect
pub fn build_client(timeout: Duration) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

#[async_trait]
impl Fetcher<Value> for HttpFetcher {
    async fn fetch(&self) -> Result<Value, FetchError> {
        debug!(url = %self.url, "requesting upstream");
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let text = response.text().await?;
        parse_body(&text)
    }
}

/// Interprets a response body
///
/// An empty body or a JSON `null` is the upstream's way of saying "nothing
/// here" and is reported as [`FetchError::NoData`], never cached.
fn parse_body(text: &str) -> Result<Value, FetchError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FetchError::NoData);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Null) => Err(FetchError::NoData),
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(text.to_string())),
    }
}
