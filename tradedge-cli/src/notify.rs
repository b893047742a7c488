//! Native-notification stand-in that forwards alerts to a webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use tradedge_gateway::{GatewayError, GatewayResult, Notifier};

/// Posts `{"title", "message"}` payloads to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayError::Other(format!("failed to build webhook client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build a notifier when a non-blank webhook is configured.
    pub fn from_config(webhook: Option<String>, timeout: Duration) -> GatewayResult<Option<Self>> {
        sanitize_webhook(webhook)
            .map(|url| Self::new(url, timeout))
            .transpose()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn request_permission(&self) -> GatewayResult<()> {
        reqwest::Url::parse(&self.url)
            .map(|_| ())
            .map_err(|err| GatewayError::PermissionDenied(format!("invalid webhook url: {err}")))
    }

    async fn show(&self, title: &str, body: &str) -> GatewayResult<()> {
        let payload = json!({ "title": title, "message": body });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| GatewayError::Delivery(format!("webhook request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "notification webhook rejected payload");
            return Err(GatewayError::Delivery(format!(
                "webhook responded with {status}"
            )));
        }
        debug!(%title, "notification delivered");
        Ok(())
    }
}

pub fn sanitize_webhook(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_webhooks_are_ignored() {
        assert_eq!(sanitize_webhook(Some("   ".into())), None);
        assert_eq!(sanitize_webhook(None), None);
        assert_eq!(
            sanitize_webhook(Some(" https://hooks.example/x ".into())).as_deref(),
            Some("https://hooks.example/x")
        );
    }

    #[tokio::test]
    async fn malformed_webhook_denies_permission() {
        let notifier = WebhookNotifier::new("not a url", Duration::from_secs(1)).unwrap();
        let err = notifier.request_permission().await.unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied(_)));
    }
}
