use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};

use tradedge_alerts::AlertSink;
use tradedge_cli::live::{
    fetch_once, run_live_with_shutdown, LiveSessionSettings, ShutdownSignal,
};
use tradedge_config::AppConfig;
use tradedge_core::{ConnectionState, Session, Trade, TradeOrigin};
use tradedge_test_utils::{MockGateway, MockGatewayConfig, PackageGrant, TradeRowBuilder};

const TOKEN: &str = "token-123";

fn settings(gateway: &MockGateway) -> Result<LiveSessionSettings> {
    let mut config = AppConfig::default();
    config.gateway.rest_url = gateway.rest_url();
    config.gateway.transactions_url = gateway.rest_url();
    config.gateway.request_timeout_secs = 2;
    config.channel.ws_url = gateway.ws_url();
    config.channel.app_key = "test-app-key".into();
    config.channel.channel_name = "trades".into();
    config.channel.initial_backoff_ms = 20;
    config.channel.max_backoff_ms = 80;
    config.bulk.retry_delay_ms = 10;
    config.messaging.url = gateway.messaging_url();
    config.messaging.api_key = Some("test-messaging-key".into());
    config.messaging.template_id = Some("trade_alert".into());
    config.notifications.webhook_url = Some(gateway.webhook_url());
    config.live.metrics_addr = String::new();
    config.live.display_utc_offset_minutes = Some(0);
    config.cache.enabled = false;
    LiveSessionSettings::from_config(&config)
}

async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Err(anyhow!("timed out waiting for {what}"))
}

#[derive(Default)]
struct Recorded {
    states: Vec<ConnectionState>,
    delivered: Vec<Trade>,
}

#[derive(Clone, Default)]
struct CollectingSink {
    inner: Arc<Mutex<Recorded>>,
}

impl CollectingSink {
    fn connected(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .states
            .contains(&ConnectionState::Connected)
    }

    fn delivered(&self) -> Vec<Trade> {
        self.inner.lock().unwrap().delivered.clone()
    }
}

impl AlertSink for CollectingSink {
    fn on_lists_updated(&self, _today: &[Trade], _all: &[Trade]) {}

    fn on_new_trade(&self, trade: &Trade) {
        self.inner.lock().unwrap().delivered.push(trade.clone());
    }

    fn on_connection_state(&self, state: ConnectionState) {
        self.inner.lock().unwrap().states.push(state);
    }
}

#[tokio::test]
async fn fetch_once_applies_dedup_and_entitlements() -> Result<()> {
    let now = Utc::now();
    let config = MockGatewayConfig::new(TOKEN)
        .with_trades([
            TradeRowBuilder::new(1, "INFY")
                .package("3")
                .created_at(now - ChronoDuration::minutes(5))
                .build(),
            TradeRowBuilder::new(2, "TCS")
                .package("9")
                .created_at(now - ChronoDuration::minutes(4))
                .build(),
            TradeRowBuilder::new(3, "SBIN")
                .created_at(now - ChronoDuration::minutes(3))
                .build(),
            TradeRowBuilder::new(1, "INFY")
                .package("3")
                .created_at(now - ChronoDuration::minutes(5))
                .build(),
        ])
        .with_package("42", PackageGrant::paid("3", 999).expiring("2999-01-01"));
    let gateway = MockGateway::start(config).await?;

    let report = fetch_once(&settings(&gateway)?, &Session::new("LNUSR42", TOKEN)).await?;
    let ids: Vec<_> = report.all.iter().map(|trade| trade.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "1"]);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.filtered, 1);
    assert!(report.today.len() <= report.all.len());
    assert!(report.snapshot.purchased_subtype_ids.contains("3"));
    assert!(report
        .all
        .iter()
        .all(|trade| trade.origin == TradeOrigin::Bulk));
    Ok(())
}

#[tokio::test]
async fn live_session_fans_out_broadcast_trades() -> Result<()> {
    let config = MockGatewayConfig::new(TOKEN)
        .with_trades([TradeRowBuilder::new(1, "INFY").package("3").build()])
        .with_package("42", PackageGrant::paid("3", 999));
    let gateway = MockGateway::start(config).await?;
    let session = Session::new("LNUSR42", TOKEN).with_phone("+91 98765 43210");
    let sink = CollectingSink::default();
    let shutdown = ShutdownSignal::manual();

    let task = tokio::spawn(run_live_with_shutdown(
        settings(&gateway)?,
        session,
        Arc::new(sink.clone()),
        shutdown.clone(),
    ));

    eventually("channel connection", || {
        let sink = sink.clone();
        async move { sink.connected() }
    })
    .await?;

    let state = gateway.state();
    state
        .broadcast("new-trade", TradeRowBuilder::new(1, "INFY").package("3").build())
        .await?;
    state
        .broadcast(
            "new-trade",
            TradeRowBuilder::new(5, "WIPRO")
                .package("3")
                .created_at(Utc::now())
                .build(),
        )
        .await?;

    eventually("outbound message", || {
        let state = state.clone();
        async move { state.sent_messages().await.len() == 1 }
    })
    .await?;
    eventually("webhook notification", || {
        let state = state.clone();
        async move { state.notifications().await.len() == 1 }
    })
    .await?;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, "5");
    assert_eq!(delivered[0].origin, TradeOrigin::Live);
    let sent = state.sent_messages().await;
    assert_eq!(sent[0]["mobile"], "919876543210");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await???;
    eventually("channel unsubscribe", || {
        let state = state.clone();
        async move { state.subscriber_count().await == 0 }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn live_session_requires_an_app_key() -> Result<()> {
    let gateway = MockGateway::start(MockGatewayConfig::new(TOKEN)).await?;
    let mut settings = settings(&gateway)?;
    settings.pusher.app_key = String::new();
    let result = run_live_with_shutdown(
        settings,
        Session::new("42", TOKEN),
        Arc::new(CollectingSink::default()),
        ShutdownSignal::manual(),
    )
    .await;
    assert!(result.is_err());
    Ok(())
}
