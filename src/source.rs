//! Remote content source.
//!
//! The cache treats the source as an opaque "fetch content for key" operation. The
//! HTTP implementation talks to a JSON content service; anything else (an LLM-backed
//! generator, a fixture directory) only has to implement [`ContentSource`].

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::cache::ContentHints;

/// Authoritative source of clinical reference content.
#[async_trait]
pub trait ContentSource: Send + Sync {
  /// Fetch the current payload for `key`. May fail with a network/availability error.
  async fn fetch_content(&self, key: &str, hints: &ContentHints) -> Result<Value>;
}

/// Content source backed by an HTTP JSON API.
///
/// `GET {base}/content/{key}?category=..&contentType=..`
#[derive(Clone)]
pub struct HttpContentSource {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpContentSource {
  pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    let mut base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid source URL '{}': {}", base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Source URL '{}' cannot be used as a base", base_url));
    }
    // Keep the last path segment when joining
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  /// URL for one content key.
  pub fn content_url(&self, key: &str, hints: &ContentHints) -> Result<Url> {
    let mut url = self
      .base
      .join("content/")
      .map_err(|e| eyre!("Failed to build content URL: {}", e))?;
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Source URL cannot have path segments"))?
      .pop_if_empty()
      .push(key);

    {
      let mut query = url.query_pairs_mut();
      if let Some(category) = &hints.category {
        query.append_pair("category", category);
      }
      if let Some(content_type) = &hints.content_type {
        query.append_pair("contentType", content_type);
      }
    }
    if url.query() == Some("") {
      url.set_query(None);
    }

    Ok(url)
  }
}

#[async_trait]
impl ContentSource for HttpContentSource {
  async fn fetch_content(&self, key: &str, hints: &ContentHints) -> Result<Value> {
    let url = self.content_url(key, hints)?;

    let mut request = self.client.get(url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("Source returned {} for {}", status, key));
    }

    response
      .json::<Value>()
      .await
      .map_err(|e| eyre!("Failed to parse content for {}: {}", key, e))
  }
}
