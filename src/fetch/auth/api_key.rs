use crate::fetch::client::HttpClient;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that sends a feed key as an HTTP header.
///
/// The header is validated once at construction so every request can be
/// decorated without a failure path.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let mut key = HeaderValue::from_str(key)?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name: HeaderName::from_bytes(header_name.as_bytes())?,
            key,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use std::time::Duration;

    #[test]
    fn test_rejects_invalid_header_name() {
        let inner = BasicClient::new(Duration::from_secs(5)).unwrap();
        assert!(ApiKey::new(inner, "bad header", "k").is_err());
    }

    #[test]
    fn test_accepts_valid_header() {
        let inner = BasicClient::new(Duration::from_secs(5)).unwrap();
        assert!(ApiKey::new(inner, "X-Api-Key", "secret").is_ok());
    }
}
