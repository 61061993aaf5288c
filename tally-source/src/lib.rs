use async_trait::async_trait;
use thiserror::Error;

pub mod extract;
pub use extract::{extract_count, page_text, parse_value};

pub mod http_page;
pub use http_page::{HttpPageSource, DEFAULT_USER_AGENT};

pub mod retry;
pub use retry::{
    Clock, FetchState, FetchTimeout, Fetched, ManualClock, RetryPolicy, RetryingFetcher,
    TokioClock,
};

#[derive(Debug, Error)]
#[error("source error: {message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Where raw metric pages come from.
///
/// Transport failures and unparseable pages are both "not found" to callers;
/// the error only carries detail for logs.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_page(&self, key: &str) -> Result<String, SourceError>;
}

/// Source with no pages; every fetch misses.
pub struct NullSource;

#[async_trait]
impl MetricSource for NullSource {
    async fn fetch_page(&self, key: &str) -> Result<String, SourceError> {
        Err(SourceError::new(format!("NullSource has no page for {key}")))
    }
}
