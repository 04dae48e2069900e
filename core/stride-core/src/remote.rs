//! Delivery of activity records to the remote endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use stride_protocol::{SaveActivityRequest, SAVE_ACTIVITY_PATH};
use tracing::debug;

use crate::error::DeliveryError;

/// Where finished activities are sent. Success means the server has the
/// record; anything else leaves it queued.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn deliver(&self, request: &SaveActivityRequest) -> Result<(), DeliveryError>;
}

/// `POST {endpoint}/saveActivity` with a JSON body. Any 2xx is success.
pub struct HttpActivitySink {
    client: Client,
    url: String,
}

impl HttpActivitySink {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), SAVE_ACTIVITY_PATH),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ActivitySink for HttpActivitySink {
    async fn deliver(&self, request: &SaveActivityRequest) -> Result<(), DeliveryError> {
        request.validate().map_err(DeliveryError::Invalid)?;

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(id = %request.id, status = status.as_u16(), "Activity delivered");
        Ok(())
    }
}
