use std::sync::Arc;
use std::time::Duration;

use hyper::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;

/// Request or connection that can trigger a scripted behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScenarioTrigger {
    TradesRequest,
    TransactionsRequest,
    SendMessage,
    Notification,
    ChannelConnect,
}

/// Scripted behavior applied to the next matching interaction.
#[derive(Clone, Debug)]
pub enum ScenarioAction {
    Delay(Duration),
    Fail { status: StatusCode, reason: String },
    /// Serve this body instead of the configured one.
    RespondWith(Value),
    /// Answer the subscription with a `pusher:error` frame and close.
    RejectSubscription { code: u16, message: String },
}

#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub trigger: ScenarioTrigger,
    pub action: ScenarioAction,
}

impl Scenario {
    pub fn fail(
        name: impl Into<String>,
        trigger: ScenarioTrigger,
        status: StatusCode,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            action: ScenarioAction::Fail {
                status,
                reason: reason.into(),
            },
        }
    }

    pub fn delay(name: impl Into<String>, trigger: ScenarioTrigger, delay: Duration) -> Self {
        Self {
            name: name.into(),
            trigger,
            action: ScenarioAction::Delay(delay),
        }
    }

    pub fn respond_with(name: impl Into<String>, trigger: ScenarioTrigger, body: Value) -> Self {
        Self {
            name: name.into(),
            trigger,
            action: ScenarioAction::RespondWith(body),
        }
    }
}

/// FIFO of scripted scenarios shared by the mock servers.
#[derive(Clone, Default)]
pub struct ScenarioManager {
    inner: Arc<Mutex<Vec<Scenario>>>,
}

impl ScenarioManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, scenario: Scenario) {
        self.inner.lock().await.push(scenario);
    }

    /// Queue the same scenario `times` times (e.g. three consecutive outages).
    pub async fn push_repeated(&self, scenario: Scenario, times: usize) {
        let mut guard = self.inner.lock().await;
        for _ in 0..times {
            guard.push(scenario.clone());
        }
    }

    /// Removes and returns the first scenario registered for `trigger`.
    pub async fn take_for(&self, trigger: ScenarioTrigger) -> Option<ScenarioAction> {
        let mut guard = self.inner.lock().await;
        let idx = guard
            .iter()
            .position(|scenario| scenario.trigger == trigger)?;
        let scenario = guard.remove(idx);
        tracing::debug!(scenario = %scenario.name, "applying scripted scenario");
        Some(scenario.action)
    }

    pub async fn pending(&self) -> usize {
        self.inner.lock().await.len()
    }
}
