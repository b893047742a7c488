use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::scenario::ScenarioManager;

/// Purchased package served by the transactions endpoint.
#[derive(Clone, Debug)]
pub struct PackageGrant {
    pub subtype_id: String,
    pub price: u64,
    pub amount_paid: u64,
    pub status: String,
    pub expiry_date: Option<String>,
}

impl PackageGrant {
    /// Fully paid, completed package without an expiry.
    pub fn paid(subtype_id: impl Into<String>, price: u64) -> Self {
        Self {
            subtype_id: subtype_id.into(),
            price,
            amount_paid: price,
            status: "completed".into(),
            expiry_date: None,
        }
    }

    #[must_use]
    pub fn expiring(mut self, expiry_date: impl Into<String>) -> Self {
        self.expiry_date = Some(expiry_date.into());
        self
    }

    #[must_use]
    pub fn with_payment(mut self, amount_paid: u64, status: impl Into<String>) -> Self {
        self.amount_paid = amount_paid;
        self.status = status.into();
        self
    }

    fn to_json(&self) -> Value {
        let mut package = json!({
            "package_details": {
                "subtype_id": self.subtype_id,
                "package_price": self.price,
            },
            "payment_history": [{
                "amount": self.amount_paid,
                "payment_status": self.status,
            }],
        });
        if let Some(expiry) = &self.expiry_date {
            package["purchase_info"] = json!({ "expiry_date": expiry });
        }
        package
    }
}

/// Static configuration of the mock gateway.
#[derive(Clone)]
pub struct MockGatewayConfig {
    pub access_token: String,
    pub app_key: String,
    pub channel: String,
    pub messaging_api_key: String,
    /// Body served by `GET /trades`.
    pub trades_body: Value,
    pub packages: HashMap<String, Vec<PackageGrant>>,
    pub scenarios: ScenarioManager,
}

impl MockGatewayConfig {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            app_key: "test-app-key".into(),
            channel: "trades".into(),
            messaging_api_key: "test-messaging-key".into(),
            trades_body: json!({ "data": [] }),
            packages: HashMap::new(),
            scenarios: ScenarioManager::new(),
        }
    }

    #[must_use]
    pub fn with_trades(mut self, rows: impl IntoIterator<Item = Value>) -> Self {
        self.trades_body = json!({ "data": rows.into_iter().collect::<Vec<_>>() });
        self
    }

    #[must_use]
    pub fn with_trades_body(mut self, body: Value) -> Self {
        self.trades_body = body;
        self
    }

    /// Register a purchase for `user_id` (without the `LNUSR` prefix).
    #[must_use]
    pub fn with_package(mut self, user_id: impl Into<String>, grant: PackageGrant) -> Self {
        self.packages.entry(user_id.into()).or_default().push(grant);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, app_key: impl Into<String>, channel: impl Into<String>) -> Self {
        self.app_key = app_key.into();
        self.channel = channel.into();
        self
    }

    #[must_use]
    pub fn with_scenarios(mut self, scenarios: ScenarioManager) -> Self {
        self.scenarios = scenarios;
        self
    }
}

/// Shared state for the in-memory mock gateway.
#[derive(Clone)]
pub struct MockGatewayState {
    inner: Arc<Mutex<Inner>>,
    scenarios: ScenarioManager,
}

struct Inner {
    config: MockGatewayConfig,
    requests: HashMap<String, usize>,
    sent_messages: Vec<Value>,
    notifications: Vec<Value>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<Message>>,
    next_connection: u64,
}

impl MockGatewayState {
    pub fn new(config: MockGatewayConfig) -> Self {
        let scenarios = config.scenarios.clone();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                requests: HashMap::new(),
                sent_messages: Vec::new(),
                notifications: Vec::new(),
                subscribers: HashMap::new(),
                next_connection: 0,
            })),
            scenarios,
        }
    }

    #[must_use]
    pub fn scenarios(&self) -> ScenarioManager {
        self.scenarios.clone()
    }

    pub async fn access_token(&self) -> String {
        self.inner.lock().await.config.access_token.clone()
    }

    pub async fn app_key(&self) -> String {
        self.inner.lock().await.config.app_key.clone()
    }

    pub async fn channel(&self) -> String {
        self.inner.lock().await.config.channel.clone()
    }

    pub async fn messaging_api_key(&self) -> String {
        self.inner.lock().await.config.messaging_api_key.clone()
    }

    pub async fn trades_body(&self) -> Value {
        self.inner.lock().await.config.trades_body.clone()
    }

    pub async fn set_trades(&self, rows: impl IntoIterator<Item = Value>) {
        let body = json!({ "data": rows.into_iter().collect::<Vec<_>>() });
        self.inner.lock().await.config.trades_body = body;
    }

    pub async fn grant_package(&self, user_id: impl Into<String>, grant: PackageGrant) {
        let mut guard = self.inner.lock().await;
        guard
            .config
            .packages
            .entry(user_id.into())
            .or_default()
            .push(grant);
    }

    /// Body served by `GET /api/userTransactionsById` for `user_id`.
    pub async fn transactions_body(&self, user_id: &str) -> Value {
        let guard = self.inner.lock().await;
        let packages: Vec<Value> = guard
            .config
            .packages
            .get(user_id)
            .map(|grants| grants.iter().map(PackageGrant::to_json).collect())
            .unwrap_or_default();
        json!({
            "transactions": {
                "status": "success",
                "data": { "packages": packages },
            }
        })
    }

    pub async fn record_request(&self, path: &str) {
        *self
            .inner
            .lock()
            .await
            .requests
            .entry(path.to_string())
            .or_default() += 1;
    }

    pub async fn request_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .await
            .requests
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub async fn record_message(&self, body: Value) {
        self.inner.lock().await.sent_messages.push(body);
    }

    pub async fn sent_messages(&self) -> Vec<Value> {
        self.inner.lock().await.sent_messages.clone()
    }

    pub async fn record_notification(&self, body: Value) {
        self.inner.lock().await.notifications.push(body);
    }

    pub async fn notifications(&self) -> Vec<Value> {
        self.inner.lock().await.notifications.clone()
    }

    pub(crate) async fn add_subscriber(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let mut guard = self.inner.lock().await;
        guard.next_connection += 1;
        let id = guard.next_connection;
        guard.subscribers.insert(id, sender);
        id
    }

    pub(crate) async fn remove_subscriber(&self, id: u64) {
        self.inner.lock().await.subscribers.remove(&id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    /// Publish `event` on the channel. `data` is JSON-encoded into a string the
    /// way the hosted service does. Returns the number of receiving connections.
    pub async fn broadcast(&self, event: &str, data: Value) -> Result<usize> {
        let guard = self.inner.lock().await;
        if guard.subscribers.is_empty() {
            return Err(anyhow!("no subscribers connected to '{}'", guard.config.channel));
        }
        let frame = json!({
            "event": event,
            "channel": guard.config.channel,
            "data": data.to_string(),
        })
        .to_string();
        let mut delivered = 0;
        for sender in guard.subscribers.values() {
            if sender.send(Message::Text(frame.clone())).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Close every subscribed connection from the server side.
    pub async fn drop_subscribers(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let dropped = guard.subscribers.len();
        for (_, sender) in guard.subscribers.drain() {
            let _ = sender.send(Message::Close(None));
        }
        dropped
    }
}
