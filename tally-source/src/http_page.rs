use std::time::Duration;

use async_trait::async_trait;

use crate::{MetricSource, SourceError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Fetches `<base_url>/<key>` over HTTP with a browser-like user agent.
///
/// The per-request timeout is independent of the retry ceiling.
pub struct HttpPageSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPageSource {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::new(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn page_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl MetricSource for HttpPageSource {
    async fn fetch_page(&self, key: &str) -> Result<String, SourceError> {
        let url = self.page_url(key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::new(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            return Err(SourceError::new(format!("HTTP status: {}", resp.status())));
        }

        resp.text()
            .await
            .map_err(|e| SourceError::new(format!("body error: {e}")))
    }
}
