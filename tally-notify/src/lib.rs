use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod report;
pub use report::{render, Report};

pub mod webhook;
pub use webhook::{WebhookConfig, WebhookDispatcher};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher setup failed: {0}")]
    Setup(String),
    #[error("dispatch transport error: {0}")]
    Transport(String),
    #[error("dispatch rejected with status {0}")]
    Status(u16),
}

/// Outbound sink for rendered reports. One opaque text message per call.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, message: &str) -> Result<(), DispatchError>;
}

/// Used when no alert transport is configured; drops every message.
pub struct NullDispatcher;

#[async_trait]
impl AlertDispatcher for NullDispatcher {
    async fn dispatch(&self, message: &str) -> Result<(), DispatchError> {
        tracing::debug!(chars = message.chars().count(), "no alert transport configured");
        Ok(())
    }
}

/// Pick the dispatcher for an optional webhook section. A missing section or
/// an empty URL is a silent no-op, not an error.
pub fn dispatcher_for(
    config: Option<&WebhookConfig>,
) -> Result<Arc<dyn AlertDispatcher>, DispatchError> {
    match config {
        Some(cfg) if !cfg.url.trim().is_empty() => Ok(Arc::new(WebhookDispatcher::new(cfg)?)),
        _ => Ok(Arc::new(NullDispatcher)),
    }
}
