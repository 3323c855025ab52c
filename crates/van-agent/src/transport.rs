//! Transport carrying protocol messages to the controller

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use van_core::SiteMessage;

use crate::error::Result;

/// Request/response channel to the controller
///
/// One message in, one response envelope out. Protocol failures arrive as
/// ordinary envelopes; only transport faults are errors here.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn send(&self, message: &SiteMessage) -> Result<Value>;
}

/// HTTP transport posting to `/v1/sync`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/sync", self.base_url)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn send(&self, message: &SiteMessage) -> Result<Value> {
        let url = self.endpoint();
        debug!(op = %message.op(), url = %url, "Sending site message");

        let response = self
            .client
            .post(&url)
            .json(&message.encode())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
