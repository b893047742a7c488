//! Outbound templated messages (WhatsApp templates through the notification provider).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use tradedge_gateway::{GatewayError, GatewayErrorKind, GatewayResult, MessageSender};

/// Provider endpoint and credentials.
#[derive(Clone, Debug)]
pub struct MessagingSettings {
    pub url: String,
    pub api_key: String,
    pub template_id: String,
    /// Prefix prepended to the ten-digit national number.
    pub country_code: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct TemplateRequest<'a> {
    mobile: String,
    templateid: &'a str,
    overridebot: &'a str,
    parameters: &'a Value,
}

/// Sends one template per call. Failures are reported as [`GatewayError::Delivery`]
/// and never retried here.
#[derive(Clone)]
pub struct TemplateMessenger {
    client: Client,
    settings: MessagingSettings,
}

impl TemplateMessenger {
    pub fn new(settings: MessagingSettings) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Other))?;
        Ok(Self { client, settings })
    }

    fn mobile(&self, phone: &str) -> GatewayResult<String> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 10 {
            return Err(GatewayError::InvalidRequest(format!(
                "expected a ten-digit phone number, got {} digits",
                digits.len()
            )));
        }
        Ok(format!("{}{digits}", self.settings.country_code))
    }
}

#[async_trait]
impl MessageSender for TemplateMessenger {
    async fn send_template(&self, phone: &str, parameters: &Value) -> GatewayResult<()> {
        let request = TemplateRequest {
            mobile: self.mobile(phone)?,
            templateid: &self.settings.template_id,
            overridebot: "no",
            parameters,
        };
        let response = self
            .client
            .post(&self.settings.url)
            .header("API-KEY", &self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Delivery))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "template message rejected");
            return Err(GatewayError::Delivery(format!("provider returned {status}")));
        }
        debug!(template = %self.settings.template_id, "template message accepted");
        Ok(())
    }
}
