mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::FeedAuth;
use auth::{ApiKey, UrlParam};

/// GETs `url` and returns the body. Non-success statuses are errors, so a
/// refresh never swaps in an error page.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("feed returned HTTP {status}");
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Builds the client for one feed, wrapping it with the configured key.
pub fn build_client(auth: &FeedAuth, timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    let basic = BasicClient::new(timeout)?;
    let client: Arc<dyn HttpClient> = match auth {
        FeedAuth::None => Arc::new(basic),
        FeedAuth::Header { header_name, key } => Arc::new(ApiKey::new(basic, header_name, key)?),
        FeedAuth::UrlParam { param_name, key } => Arc::new(UrlParam {
            inner: basic,
            param_name: param_name.clone(),
            key: key.clone(),
        }),
    };
    Ok(client)
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(client))]
pub async fn load_bytes<C: HttpClient + ?Sized>(client: &C, source: &str) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(client, source).await?
    } else {
        tokio::fs::read(source).await?
    };
    debug!(bytes = bytes.len(), "Feed bytes loaded");
    Ok(bytes)
}
