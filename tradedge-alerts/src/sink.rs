//! Callbacks through which the pipeline reports to its host.

use serde_json::Value;
use tradedge_core::{ConnectionState, DispatcherPhase, Trade};
use tradedge_gateway::GatewayError;

/// Stage of the pipeline that produced an error reported through [`AlertSink::on_error`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorSource {
    BulkFetch,
    Entitlements,
    Channel,
    Notification,
    OutboundMessage,
    Permission,
}

impl ErrorSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkFetch => "bulk_fetch",
            Self::Entitlements => "entitlements",
            Self::Channel => "channel",
            Self::Notification => "notification",
            Self::OutboundMessage => "outbound_message",
            Self::Permission => "permission",
        }
    }
}

/// Receiver of list updates and pipeline events.
///
/// Implementations are invoked from the dispatcher task and must not block.
pub trait AlertSink: Send + Sync {
    /// Both lists are newest first; `today` is always a subset of `all`.
    fn on_lists_updated(&self, today: &[Trade], all: &[Trade]);

    /// A live trade passed dedup and entitlement filtering.
    fn on_new_trade(&self, trade: &Trade);

    fn on_connection_state(&self, _state: ConnectionState) {}

    fn on_error(&self, _source: ErrorSource, _error: &GatewayError) {}

    fn on_follow_up(&self, _payload: &Value) {}

    fn on_pending_count(&self, _payload: &Value) {}

    fn on_announcement(&self, _payload: &Value) {}

    fn on_phase(&self, _phase: DispatcherPhase) {}
}
