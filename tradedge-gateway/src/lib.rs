//! Collaborator-agnostic traits used by the alert pipeline.
//!
//! Every external service the pipeline talks to (REST gateway, broadcast
//! channel, notification capability, templated-message provider) is reached
//! through one of the traits below so the dispatcher can be wired explicitly
//! and exercised against in-memory doubles.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tradedge_core::{ChannelUpdate, EntitlementSnapshot, Session};

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Common error type returned by collaborator implementations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport-level failures (connect, timeout, 5xx). Retryable.
    #[error("network error: {0}")]
    Network(String),
    /// The response could not be interpreted (unexpected envelope, invalid JSON).
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The user (or host) refused a capability such as notifications.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// An outbound message or notification could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Returned when the access token is missing, expired or rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Request parameters are invalid for the target service.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Helper used by connectors when mapping any error type into a gateway error.
    pub fn from_display(err: impl std::fmt::Display, kind: GatewayErrorKind) -> Self {
        match kind {
            GatewayErrorKind::Network => Self::Network(err.to_string()),
            GatewayErrorKind::MalformedResponse => Self::MalformedResponse(err.to_string()),
            GatewayErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            GatewayErrorKind::Delivery => Self::Delivery(err.to_string()),
            GatewayErrorKind::Authentication => Self::Authentication(err.to_string()),
            GatewayErrorKind::InvalidRequest => Self::InvalidRequest(err.to_string()),
            GatewayErrorKind::Other => Self::Other(err.to_string()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            Self::Network(_) => GatewayErrorKind::Network,
            Self::MalformedResponse(_) => GatewayErrorKind::MalformedResponse,
            Self::PermissionDenied(_) => GatewayErrorKind::PermissionDenied,
            Self::Delivery(_) => GatewayErrorKind::Delivery,
            Self::Authentication(_) => GatewayErrorKind::Authentication,
            Self::InvalidRequest(_) => GatewayErrorKind::InvalidRequest,
            Self::Other(_) => GatewayErrorKind::Other,
        }
    }

    /// Only transport failures are worth retrying; everything else repeats deterministically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Enumerates the broad families of gateway errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GatewayErrorKind {
    Network,
    MalformedResponse,
    PermissionDenied,
    Delivery,
    Authentication,
    InvalidRequest,
    Other,
}

impl GatewayErrorKind {
    /// Stable label used for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::MalformedResponse => "malformed_response",
            Self::PermissionDenied => "permission_denied",
            Self::Delivery => "delivery",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        }
    }
}

/// Source of the bulk trade list (`GET /trades?type=all`).
#[async_trait]
pub trait TradeFeed: Send + Sync {
    /// Human-friendly name of the feed used for logging purposes.
    fn name(&self) -> &str;

    /// Fetch every raw trade row visible to the session, unwrapped from its envelope.
    async fn fetch_all(&self, session: &Session) -> GatewayResult<Vec<Value>>;
}

/// Provides the purchased-package snapshot of a user.
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    async fn fetch_snapshot(&self, session: &Session) -> GatewayResult<EntitlementSnapshot>;
}

/// Native notification capability. Optional; failures are never fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the host for permission to display notifications.
    async fn request_permission(&self) -> GatewayResult<()>;

    /// Display a single notification.
    async fn show(&self, title: &str, body: &str) -> GatewayResult<()>;
}

/// Outbound templated-message provider (e.g., WhatsApp templates).
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send the configured template to `phone` (ten-digit national number).
    async fn send_template(&self, phone: &str, parameters: &Value) -> GatewayResult<()>;
}

/// Persistent subscription to a named broadcast channel.
#[async_trait]
pub trait LiveChannel: Send {
    /// Name of the subscribed channel.
    fn name(&self) -> &str;

    /// Next connection-state transition or inbound event.
    ///
    /// Returns `None` once the channel has been disconnected for good.
    async fn next_update(&mut self) -> Option<ChannelUpdate>;

    /// Restart the connection after the adapter gave up retrying.
    async fn reconnect(&mut self) -> GatewayResult<()>;

    /// Unsubscribe and close the connection. Calling it more than once is a no-op.
    async fn disconnect(&mut self);
}

/// Helper trait used by connectors to (de)serialize gateway payloads.
pub trait PayloadExt: Sized {
    /// Deserialize JSON bytes into a strongly typed payload.
    fn from_json_bytes(bytes: &[u8]) -> GatewayResult<Self>
    where
        Self: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|err| {
            GatewayError::MalformedResponse(format!("failed to deserialize payload: {err}"))
        })
    }
}

impl<T> PayloadExt for T where T: DeserializeOwned {}
