//! Webhook alert delivery.
//!
//! POSTs the rendered [`AlertPayload`] as JSON to a single configured URL
//! (`ALERT_WEBHOOK_URL`). Any 2xx response counts as delivered.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::alerts::notifier::{AlertNotifier, NotifyError};
use crate::alerts::payload::AlertPayload;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, payload: &AlertPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Http {
                status: status.as_u16(),
            });
        }

        tracing::info!(
            network = %payload.network,
            level = %payload.level,
            "Alert delivered to webhook"
        );
        Ok(())
    }
}
