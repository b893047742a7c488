use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, Local, Offset, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{info, warn};

use tradedge_alerts::{
    AlertCache, AlertDispatcher, AlertMetrics, AlertSink, BulkFetcher, DispatcherConfig,
    DispatcherDeps, EntitlementFilter, EntitlementRefresher, EntitlementStore, ErrorSource,
    JsonFileCache, NormalizerDefaults, RetryPolicy, SeenRegistry, TradeBook, TradeNormalizer,
};
use tradedge_config::{AppConfig, SessionConfig};
use tradedge_core::{
    offset_from_minutes, ConnectionState, EntitlementSnapshot, Session, Trade,
    UntaggedTradePolicy,
};
use tradedge_gateway::{GatewayError, MessageSender, Notifier};
use tradedge_twm::{
    MessagingSettings, PusherChannel, PusherSettings, ReconnectPolicy, TemplateMessenger,
    TwmClient, TwmConfig,
};

use crate::notify::WebhookNotifier;
use crate::telemetry::spawn_metrics_server;

/// Everything a live session needs, resolved from [`AppConfig`].
#[derive(Clone, Debug)]
pub struct LiveSessionSettings {
    pub twm: TwmConfig,
    pub pusher: PusherSettings,
    pub retry: RetryPolicy,
    pub refresh_interval: Duration,
    pub untagged_policy: UntaggedTradePolicy,
    pub normalizer: NormalizerDefaults,
    pub cache: Option<CacheSettings>,
    pub messaging: Option<MessagingSettings>,
    pub webhook_url: Option<String>,
    pub display_offset: FixedOffset,
    pub metrics_addr: Option<SocketAddr>,
}

/// Where the last-known lists are kept between runs.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub ttl: Duration,
}

impl LiveSessionSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.gateway.request_timeout_secs.max(1));
        let connect_timeout = Duration::from_secs(config.gateway.connect_timeout_secs.max(1));
        let twm = TwmConfig {
            base_url: config.gateway.rest_url.clone(),
            transactions_url: config.gateway.transactions_url.clone(),
            request_timeout,
            connect_timeout,
            source_offset: offset_from_minutes(config.gateway.source_utc_offset_minutes),
        };
        let pusher = PusherSettings {
            ws_url: config.channel.ws_url.clone(),
            app_key: config.channel.app_key.clone(),
            channel: config.channel.channel_name.clone(),
            heartbeat: Duration::from_secs(config.channel.heartbeat_secs.max(1)),
            handshake_timeout: connect_timeout,
            reconnect: ReconnectPolicy {
                max_attempts: config.channel.max_reconnect_attempts,
                initial_backoff: Duration::from_millis(config.channel.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.channel.max_backoff_ms),
            },
            event_buffer: config.channel.event_buffer.max(1),
        };
        let retry = RetryPolicy {
            max_attempts: config.bulk.max_attempts.max(1),
            base_delay: Duration::from_millis(config.bulk.retry_delay_ms),
            attempt_timeout: request_timeout,
        };
        let messaging = match (&config.messaging.api_key, &config.messaging.template_id) {
            (Some(api_key), Some(template_id)) => Some(MessagingSettings {
                url: config.messaging.url.clone(),
                api_key: api_key.clone(),
                template_id: template_id.clone(),
                country_code: config.messaging.country_code.clone(),
                timeout: request_timeout,
            }),
            _ => None,
        };
        let display_offset = config
            .live
            .display_utc_offset_minutes
            .map(offset_from_minutes)
            .unwrap_or_else(|| Local::now().offset().fix());
        let metrics_addr = match config.live.metrics_addr.trim() {
            "" => None,
            addr => Some(
                addr.parse()
                    .with_context(|| format!("invalid metrics address '{addr}'"))?,
            ),
        };
        let normalizer = NormalizerDefaults {
            timeframe: config.trades.timeframe.clone(),
            support_number: config.trades.support_number.clone(),
            ..NormalizerDefaults::default()
        };
        let cache = config.cache.enabled.then(|| CacheSettings {
            dir: config.cache.dir.clone(),
            ttl: Duration::from_secs(config.cache.ttl_secs.max(1)),
        });
        Ok(Self {
            twm,
            pusher,
            retry,
            refresh_interval: Duration::from_secs(config.entitlements.refresh_interval_secs.max(1)),
            untagged_policy: config.entitlements.untagged_policy,
            normalizer,
            cache,
            messaging,
            webhook_url: config.notifications.webhook_url.clone(),
            display_offset,
            metrics_addr,
        })
    }
}

/// Build a [`Session`] from configured credentials.
pub fn session_from_config(config: &SessionConfig) -> Result<Session> {
    if config.user_id.trim().is_empty() {
        bail!("session.user_id is not configured (set TRADEDGE__SESSION__USER_ID)");
    }
    if config.access_token.trim().is_empty() {
        bail!("session.access_token is not configured (set TRADEDGE__SESSION__ACCESS_TOKEN)");
    }
    let mut session = Session::new(config.user_id.trim(), config.access_token.trim());
    session.phone_number = config.phone_number.clone();
    Ok(session)
}

struct Pipeline {
    client: Arc<TwmClient>,
    normalizer: Arc<TradeNormalizer>,
    bulk: Arc<BulkFetcher>,
    refresher: Arc<EntitlementRefresher>,
    store: EntitlementStore,
    filter: EntitlementFilter,
    metrics: AlertMetrics,
}

impl Pipeline {
    fn build(settings: &LiveSessionSettings) -> Result<Self> {
        let client = Arc::new(
            TwmClient::new(settings.twm.clone()).context("failed to build gateway client")?,
        );
        let metrics = AlertMetrics::new();
        let normalizer = Arc::new(TradeNormalizer::new(
            settings.normalizer.clone(),
            settings.twm.source_offset,
        ));
        let bulk = Arc::new(BulkFetcher::new(
            client.clone(),
            normalizer.clone(),
            settings.retry,
            metrics.clone(),
        ));
        let store = EntitlementStore::new();
        let refresher = Arc::new(EntitlementRefresher::new(
            client.clone(),
            store.clone(),
            settings.refresh_interval,
            metrics.clone(),
        ));
        Ok(Self {
            client,
            normalizer,
            bulk,
            refresher,
            store,
            filter: EntitlementFilter::new(settings.untagged_policy),
            metrics,
        })
    }
}

/// Result of a one-shot bulk fetch.
#[derive(Clone, Debug)]
pub struct FetchReport {
    pub today: Vec<Trade>,
    pub all: Vec<Trade>,
    pub duplicates: usize,
    pub filtered: usize,
    pub snapshot: EntitlementSnapshot,
}

/// Fetch trades and entitlements once and apply the same dedup and
/// entitlement rules as a live session.
pub async fn fetch_once(settings: &LiveSessionSettings, session: &Session) -> Result<FetchReport> {
    let pipeline = Pipeline::build(settings)?;
    let (trades, refreshed) = tokio::join!(
        pipeline.bulk.fetch_all(session),
        pipeline.refresher.refresh_now(session, 0)
    );
    refreshed.context("failed to load entitlements")?;
    let trades = trades.context("failed to fetch trades")?;
    let snapshot = pipeline.store.snapshot();
    let now = Utc::now();

    let mut seen = SeenRegistry::new();
    let mut duplicates = 0;
    let mut filtered = 0;
    let mut book = TradeBook::new();
    book.merge_bulk(trades.into_iter().filter(|trade| {
        if !seen.mark_seen(trade.id.clone()) {
            duplicates += 1;
            return false;
        }
        if !pipeline.filter.is_visible(trade, &snapshot, now) {
            filtered += 1;
            return false;
        }
        true
    }));
    Ok(FetchReport {
        today: book.today(now, settings.display_offset),
        all: book.all().to_vec(),
        duplicates,
        filtered,
        snapshot: snapshot.as_ref().clone(),
    })
}

/// Fetch the purchased-package snapshot of `session`.
pub async fn fetch_entitlements(
    settings: &LiveSessionSettings,
    session: &Session,
) -> Result<EntitlementSnapshot> {
    let pipeline = Pipeline::build(settings)?;
    pipeline
        .refresher
        .refresh_now(session, 0)
        .await
        .context("failed to load entitlements")?;
    info!(gateway = %pipeline.client.config().base_url, "entitlements loaded");
    Ok(pipeline.store.snapshot().as_ref().clone())
}

pub async fn run_live(settings: LiveSessionSettings, session: Session) -> Result<()> {
    run_live_with_shutdown(
        settings,
        session,
        Arc::new(ConsoleSink),
        ShutdownSignal::new(),
    )
    .await
}

/// Variant of [`run_live`] with an explicit sink and a manually controlled shutdown signal.
pub async fn run_live_with_shutdown(
    settings: LiveSessionSettings,
    session: Session,
    sink: Arc<dyn AlertSink>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    if settings.pusher.app_key.trim().is_empty() {
        bail!("channel.app_key must be configured for live sessions");
    }
    let pipeline = Pipeline::build(&settings)?;
    let metrics_task = match settings.metrics_addr {
        Some(addr) => Some(spawn_metrics_server(pipeline.metrics.registry(), addr, shutdown.clone())?.1),
        None => None,
    };

    let messenger = match settings.messaging.clone() {
        Some(messaging) => Some(Arc::new(
            TemplateMessenger::new(messaging).context("failed to build message sender")?,
        ) as Arc<dyn MessageSender>),
        None => {
            info!("outbound messaging disabled");
            None
        }
    };
    let notifier = WebhookNotifier::from_config(settings.webhook_url.clone(), settings.twm.request_timeout)
        .context("failed to build notification webhook")?
        .map(|notifier| Arc::new(notifier) as Arc<dyn Notifier>);
    let cache = settings.cache.as_ref().map(|cache| {
        info!(dir = %cache.dir.display(), "alert cache enabled");
        Arc::new(JsonFileCache::new(cache.dir.clone(), cache.ttl)) as Arc<dyn AlertCache>
    });
    let channel = PusherChannel::spawn(settings.pusher.clone());

    let deps = DispatcherDeps {
        bulk: pipeline.bulk.clone(),
        normalizer: pipeline.normalizer.clone(),
        refresher: pipeline.refresher.clone(),
        filter: pipeline.filter,
        channel: Box::new(channel),
        notifier,
        messenger,
        sink,
        metrics: pipeline.metrics.clone(),
        cache,
    };
    let config = DispatcherConfig {
        display_offset: settings.display_offset,
        ..DispatcherConfig::default()
    };
    info!(
        user = %session.user_id,
        channel = %settings.pusher.channel,
        gateway = %settings.twm.base_url,
        "live session started"
    );
    let (handle, task) = AlertDispatcher::spawn(config, deps, session);

    shutdown.wait().await;
    info!("live session stopping");
    if handle.shutdown().await.is_err() {
        warn!("alert dispatcher exited before shutdown was requested");
    }
    task.await.context("alert dispatcher task failed")?;
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    Ok(())
}

#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Signal that also fires on Ctrl-C.
    pub fn new() -> Self {
        let signal = Self::manual();
        let listener = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                listener.trigger();
            }
        });
        signal
    }

    /// Signal that only fires through [`ShutdownSignal::trigger`].
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Prints delivered trades to stdout and logs everything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn on_lists_updated(&self, today: &[Trade], all: &[Trade]) {
        info!(today = today.len(), all = all.len(), "trade lists updated");
    }

    fn on_new_trade(&self, trade: &Trade) {
        println!("{}", format_trade(trade));
    }

    fn on_connection_state(&self, state: ConnectionState) {
        info!(%state, "channel connection");
    }

    fn on_error(&self, source: ErrorSource, error: &GatewayError) {
        warn!(source = source.as_str(), error = %error, "alert pipeline degraded");
    }

    fn on_follow_up(&self, payload: &Value) {
        info!(%payload, "follow-up due");
    }

    fn on_pending_count(&self, payload: &Value) {
        info!(%payload, "pending follow-ups");
    }

    fn on_announcement(&self, payload: &Value) {
        println!("announcement: {payload}");
    }
}

/// One-line rendering used by the console sink and the `fetch` command.
pub fn format_trade(trade: &Trade) -> String {
    let tags = if trade.entitlement_tags.is_empty() {
        "-".to_string()
    } else {
        trade
            .entitlement_tags
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "{} {:<12} {} [{}] {}",
        trade.created_at.format("%Y-%m-%d %H:%M"),
        trade.id,
        trade.headline(),
        tags,
        trade.timeframe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradedge_alerts::DEFAULT_SUPPORT_NUMBER;

    #[test]
    fn settings_follow_configuration() {
        let mut config = AppConfig::default();
        config.gateway.request_timeout_secs = 4;
        config.channel.app_key = "key".into();
        config.messaging.api_key = Some("secret".into());
        config.messaging.template_id = Some("tpl".into());
        config.live.metrics_addr = "127.0.0.1:0".into();
        config.live.display_utc_offset_minutes = Some(330);
        let settings = LiveSessionSettings::from_config(&config).unwrap();
        assert_eq!(settings.retry.attempt_timeout, Duration::from_secs(4));
        assert_eq!(settings.display_offset.local_minus_utc(), 330 * 60);
        assert_eq!(settings.pusher.app_key, "key");
        assert!(settings.messaging.is_some());
        assert!(settings.metrics_addr.is_some());
        assert_eq!(
            settings.normalizer.support_number.as_deref(),
            Some(DEFAULT_SUPPORT_NUMBER)
        );
        assert_eq!(
            settings.cache,
            Some(CacheSettings {
                dir: PathBuf::from("./cache"),
                ttl: Duration::from_secs(86_400),
            })
        );
    }

    #[test]
    fn trade_defaults_and_cache_are_configurable() {
        let mut config = AppConfig::default();
        config.trades.support_number = Some("1800123456".into());
        config.trades.timeframe = "Intraday".into();
        config.cache.enabled = false;
        let settings = LiveSessionSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.normalizer.support_number.as_deref(),
            Some("1800123456")
        );
        assert_eq!(settings.normalizer.timeframe, "Intraday");
        assert!(settings.cache.is_none());
    }

    #[test]
    fn messaging_requires_key_and_template() {
        let mut config = AppConfig::default();
        config.messaging.api_key = Some("secret".into());
        let settings = LiveSessionSettings::from_config(&config).unwrap();
        assert!(settings.messaging.is_none());
    }

    #[test]
    fn session_requires_credentials() {
        let mut config = SessionConfig::default();
        assert!(session_from_config(&config).is_err());
        config.user_id = "LNUSR42".into();
        config.access_token = "token".into();
        config.phone_number = Some("9876543210".into());
        let session = session_from_config(&config).unwrap();
        assert_eq!(session.gateway_user_id(), "42");
        assert_eq!(session.phone_digits().as_deref(), Some("9876543210"));
    }

    #[tokio::test]
    async fn shutdown_signal_wakes_waiters() {
        let signal = ShutdownSignal::manual();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.wait().await });
        signal.trigger();
        task.await.unwrap();
        assert!(signal.triggered());
        signal.wait().await;
    }
}
