//! Connector for the TWM research gateway.
//!
//! The REST client serves the bulk trade list and the user's transaction
//! history (from which the entitlement snapshot is derived). [`ws`] holds the
//! Pusher broadcast-channel adapter and [`messaging`] the templated-message
//! sender.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use tradedge_core::{
    offset_from_minutes, parse_decimal, parse_identifier, parse_validity_end, EntitlementSnapshot,
    Session,
};
use tradedge_gateway::{
    EntitlementSource, GatewayError, GatewayErrorKind, GatewayResult, PayloadExt, TradeFeed,
};

pub mod messaging;
pub mod ws;

pub use messaging::{MessagingSettings, TemplateMessenger};
pub use ws::{PusherChannel, PusherSettings, ReconnectPolicy};

/// Configuration for the gateway REST client.
#[derive(Clone, Debug)]
pub struct TwmConfig {
    pub base_url: String,
    /// Base URL of the service exposing `/api/userTransactionsById`.
    pub transactions_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Offset applied to naive timestamps in gateway payloads.
    pub source_offset: FixedOffset,
}

impl Default for TwmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.twmresearchalert.com".into(),
            transactions_url: "https://tradedge-server.onrender.com".into(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            source_offset: offset_from_minutes(330),
        }
    }
}

/// A thin wrapper over the gateway REST API.
pub struct TwmClient {
    http: Client,
    config: TwmConfig,
}

impl TwmClient {
    /// Build a new client with the configured timeouts.
    pub fn new(config: TwmConfig) -> GatewayResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::from_display(err, GatewayErrorKind::Other))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &TwmConfig {
        &self.config
    }

    fn url(base: &str, path: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json(
        &self,
        url: String,
        query: &[(&str, &str)],
        token: &str,
    ) -> GatewayResult<Value> {
        let mut request = self.http.get(&url).query(query);
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        debug!(url = %url, size = bytes.len(), "gateway response received");
        Value::from_json_bytes(&bytes)
    }
}

#[async_trait]
impl TradeFeed for TwmClient {
    fn name(&self) -> &str {
        "twm-gateway"
    }

    async fn fetch_all(&self, session: &Session) -> GatewayResult<Vec<Value>> {
        let url = Self::url(&self.config.base_url, "/trades");
        let payload = self
            .get_json(url, &[("type", "all")], &session.access_token)
            .await?;
        extract_trade_rows(payload)
    }
}

#[async_trait]
impl EntitlementSource for TwmClient {
    async fn fetch_snapshot(&self, session: &Session) -> GatewayResult<EntitlementSnapshot> {
        let url = Self::url(&self.config.transactions_url, "/api/userTransactionsById");
        let payload = self
            .get_json(
                url,
                &[("user_id", session.gateway_user_id())],
                &session.access_token,
            )
            .await?;
        snapshot_from_transactions(&payload, self.config.source_offset, Utc::now())
    }
}

/// Unwrap the trade rows from any of the accepted envelopes:
/// a bare array, `{"data": [...]}` or `{"trades": [...]}`.
pub fn extract_trade_rows(payload: Value) -> GatewayResult<Vec<Value>> {
    match payload {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => {
            for key in ["data", "trades"] {
                if let Some(Value::Array(rows)) = map.remove(key) {
                    return Ok(rows);
                }
            }
            let keys: Vec<_> = map.keys().cloned().collect();
            Err(GatewayError::MalformedResponse(format!(
                "trade list missing from envelope (keys: {})",
                keys.join(",")
            )))
        }
        other => Err(GatewayError::MalformedResponse(format!(
            "unexpected trade list payload: {}",
            json_kind(&other)
        ))),
    }
}

/// Build an entitlement snapshot from the user's transaction history.
///
/// A package counts as purchased when its first payment completed for the full
/// package price.
pub fn snapshot_from_transactions(
    payload: &Value,
    source_offset: FixedOffset,
    now: DateTime<Utc>,
) -> GatewayResult<EntitlementSnapshot> {
    let transactions = payload.get("transactions").unwrap_or(payload);
    let status = transactions
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("success");
    if !status.eq_ignore_ascii_case("success") {
        let message = payload
            .get("message")
            .or_else(|| transactions.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("failed to fetch transactions");
        return Err(GatewayError::Other(message.to_string()));
    }
    let packages = match transactions.pointer("/data/packages") {
        Some(Value::Array(packages)) => packages.as_slice(),
        Some(Value::Null) | None => &[],
        Some(other) => {
            return Err(GatewayError::MalformedResponse(format!(
                "transactions.data.packages is {}",
                json_kind(other)
            )))
        }
    };

    let mut purchased = Vec::new();
    let mut validity = HashMap::new();
    for package in packages {
        let Some(subtype) = package
            .pointer("/package_details/subtype_id")
            .and_then(parse_identifier)
        else {
            warn!("skipping package without subtype id");
            continue;
        };
        if !is_fully_paid(package) {
            debug!(subtype = %subtype, "package not fully paid");
            continue;
        }
        if let Some(expiry) = package_expiry(package, source_offset) {
            validity.insert(subtype.clone(), expiry);
        }
        purchased.push(subtype);
    }

    let mut snapshot = EntitlementSnapshot::new(purchased, validity);
    snapshot.fetched_at = now;
    Ok(snapshot)
}

fn is_fully_paid(package: &Value) -> bool {
    let Some(payment) = package.pointer("/payment_history/0") else {
        return false;
    };
    let completed = payment
        .get("payment_status")
        .and_then(Value::as_str)
        .map(|status| status.eq_ignore_ascii_case("completed"))
        .unwrap_or(false);
    let amount = payment.get("amount").and_then(parse_decimal);
    let price = package
        .pointer("/package_details/package_price")
        .and_then(parse_decimal);
    completed && amount.is_some() && amount == price
}

fn package_expiry(package: &Value, source_offset: FixedOffset) -> Option<DateTime<Utc>> {
    const POINTERS: [&str; 8] = [
        "/purchase_info/expiry_date",
        "/valid_till",
        "/expiry_date",
        "/valid_until",
        "/package_details/valid_till",
        "/package_details/expiry_date",
        "/payment_history/0/valid_till",
        "/payment_history/0/expiry_date",
    ];
    POINTERS
        .iter()
        .filter_map(|pointer| package.pointer(pointer))
        .find_map(|value| parse_validity_end(value, source_offset))
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::from_display(err, GatewayErrorKind::MalformedResponse)
    } else {
        GatewayError::from_display(err, GatewayErrorKind::Network)
    }
}

fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = format!("{status}: {}", body.chars().take(256).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Authentication(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::Network(message)
        }
        status if status.is_server_error() => GatewayError::Network(message),
        _ => GatewayError::InvalidRequest(message),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
