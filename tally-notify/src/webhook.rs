use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AlertDispatcher, DispatchError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    /// JSON field carrying the message: "text" for Slack, "content" for Discord.
    pub payload_field: String,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            payload_field: "text".into(),
            timeout_secs: 10,
        }
    }
}

/// Posts each message as `{"<payload_field>": message}` to a webhook URL.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
    payload_field: String,
}

impl WebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| DispatchError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            payload_field: config.payload_field.clone(),
        })
    }

    fn payload(&self, message: &str) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert(
            self.payload_field.clone(),
            serde_json::Value::String(message.to_string()),
        );
        serde_json::Value::Object(body)
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    async fn dispatch(&self, message: &str) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DispatchError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}
