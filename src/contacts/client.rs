use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;

/// Fetches raw bytes for a URL. Used for both the user list and thumbnails.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  async fn get(&self, url: &Url) -> Result<Bytes, TransportError>;
}

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| TransportError(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn get(&self, url: &Url) -> Result<Bytes, TransportError> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| TransportError(format!("GET {} failed: {}", url, e)))?;

    response
      .bytes()
      .await
      .map_err(|e| TransportError(format!("Failed to read body of {}: {}", url, e)))
  }
}

/// Build the user-list URL, replacing any `results` parameter already present.
pub fn users_url(endpoint: &Url, result_count: u32) -> Url {
  let mut url = endpoint.clone();
  let kept: Vec<(String, String)> = endpoint
    .query_pairs()
    .filter(|(k, _)| *k != "results")
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  url
    .query_pairs_mut()
    .clear()
    .extend_pairs(kept)
    .append_pair("results", &result_count.to_string());
  url
}
