//! In-memory collaborators for pipeline tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tradedge_core::{
    ChannelEvent, ChannelUpdate, ConnectionState, Direction, EntitlementSnapshot, RiskLevel,
    Session, Trade, TradeId, TradeOrigin,
};
use tradedge_gateway::{
    EntitlementSource, GatewayError, GatewayResult, LiveChannel, MessageSender, Notifier,
    TradeFeed,
};

use crate::sink::{AlertSink, ErrorSource};

pub fn trade(id: &str, created_at: DateTime<Utc>) -> Trade {
    Trade {
        id: id.to_string(),
        symbol: "INFY".into(),
        name: "INFY".into(),
        direction: Direction::Buy,
        entry_price: Decimal::from(100),
        target_price: Decimal::from(110),
        stop_loss: Decimal::from(95),
        timeframe: "1 Week".into(),
        analysis: String::new(),
        risk_level: RiskLevel::Medium,
        confidence: Decimal::from(70),
        potential_profit_pct: Decimal::from(5),
        potential_loss_pct: Decimal::from(2),
        recommended_investment: Decimal::from(50_000),
        support_number: None,
        created_at,
        entitlement_tags: BTreeSet::new(),
        origin: TradeOrigin::Bulk,
    }
}

pub struct StaticFeed {
    rows: Mutex<Vec<Value>>,
    failures: Mutex<VecDeque<GatewayError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl StaticFeed {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: Mutex::new(rows),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Holds every later fetch for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_all(&self, _session: &Session) -> GatewayResult<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

pub struct FakeEntitlementSource {
    snapshot: Mutex<EntitlementSnapshot>,
    failures: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl FakeEntitlementSource {
    pub fn new(snapshot: EntitlementSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_snapshot(&self, snapshot: EntitlementSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn fail_next(&self, reason: &str) {
        self.failures.lock().unwrap().push_back(reason.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementSource for FakeEntitlementSource {
    async fn fetch_snapshot(&self, _session: &Session) -> GatewayResult<EntitlementSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.failures.lock().unwrap().pop_front() {
            return Err(GatewayError::Network(reason));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

/// Channel whose updates are pushed by the test through a [`ChannelScript`].
pub struct ScriptedChannel {
    rx: mpsc::UnboundedReceiver<ChannelUpdate>,
    open: bool,
    disconnects: Arc<AtomicUsize>,
    reconnects: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct ChannelScript {
    tx: mpsc::UnboundedSender<ChannelUpdate>,
    disconnects: Arc<AtomicUsize>,
    reconnects: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new() -> (Self, ChannelScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let reconnects = Arc::new(AtomicUsize::new(0));
        (
            Self {
                rx,
                open: true,
                disconnects: disconnects.clone(),
                reconnects: reconnects.clone(),
            },
            ChannelScript {
                tx,
                disconnects,
                reconnects,
            },
        )
    }
}

impl ChannelScript {
    pub fn state(&self, state: ConnectionState) {
        let _ = self.tx.send(ChannelUpdate::State(state));
    }

    pub fn event(&self, name: &str, payload: Value) {
        let _ = self
            .tx
            .send(ChannelUpdate::Event(ChannelEvent::from_wire(name, payload)));
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_update(&mut self) -> Option<ChannelUpdate> {
        if !self.open {
            return None;
        }
        self.rx.recv().await
    }

    async fn reconnect(&mut self) -> GatewayResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.open {
            self.open = false;
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub deny_permission: bool,
    pub fail_show: bool,
    shown: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn denying() -> Self {
        Self {
            deny_permission: true,
            ..Self::default()
        }
    }

    pub fn failing_show() -> Self {
        Self {
            fail_show: true,
            ..Self::default()
        }
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn request_permission(&self) -> GatewayResult<()> {
        if self.deny_permission {
            return Err(GatewayError::PermissionDenied("user declined".into()));
        }
        Ok(())
    }

    async fn show(&self, title: &str, body: &str) -> GatewayResult<()> {
        if self.fail_show {
            return Err(GatewayError::Delivery("notification centre unavailable".into()));
        }
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    pub fail: bool,
    sent: Mutex<Vec<(String, Value)>>,
}

impl FakeMessenger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for FakeMessenger {
    async fn send_template(&self, phone: &str, parameters: &Value) -> GatewayResult<()> {
        if self.fail {
            return Err(GatewayError::Delivery("template rejected".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), parameters.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    lists: Mutex<Vec<(Vec<TradeId>, Vec<TradeId>)>>,
    new_trades: Mutex<Vec<TradeId>>,
    errors: Mutex<Vec<ErrorSource>>,
    states: Mutex<Vec<ConnectionState>>,
    announcements: Mutex<Vec<Value>>,
    follow_ups: Mutex<Vec<Value>>,
    pending: Mutex<Vec<Value>>,
}

impl RecordingSink {
    pub fn last_lists(&self) -> Option<(Vec<TradeId>, Vec<TradeId>)> {
        self.lists.lock().unwrap().last().cloned()
    }

    pub fn list_updates(&self) -> usize {
        self.lists.lock().unwrap().len()
    }

    pub fn new_trades(&self) -> Vec<TradeId> {
        self.new_trades.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorSource> {
        self.errors.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn announcements(&self) -> Vec<Value> {
        self.announcements.lock().unwrap().clone()
    }

    pub fn follow_ups(&self) -> Vec<Value> {
        self.follow_ups.lock().unwrap().clone()
    }

    pub fn pending(&self) -> Vec<Value> {
        self.pending.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn on_lists_updated(&self, today: &[Trade], all: &[Trade]) {
        let ids = |trades: &[Trade]| trades.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
        self.lists.lock().unwrap().push((ids(today), ids(all)));
    }

    fn on_new_trade(&self, trade: &Trade) {
        self.new_trades.lock().unwrap().push(trade.id.clone());
    }

    fn on_connection_state(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_error(&self, source: ErrorSource, _error: &GatewayError) {
        self.errors.lock().unwrap().push(source);
    }

    fn on_follow_up(&self, payload: &Value) {
        self.follow_ups.lock().unwrap().push(payload.clone());
    }

    fn on_pending_count(&self, payload: &Value) {
        self.pending.lock().unwrap().push(payload.clone());
    }

    fn on_announcement(&self, payload: &Value) {
        self.announcements.lock().unwrap().push(payload.clone());
    }
}
