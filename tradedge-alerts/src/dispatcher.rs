//! Single-owner orchestrator of the alert pipeline.
//!
//! All pipeline state (seen ids, trade lists, connection state) lives in one
//! task. Commands from the host, bulk results, channel updates and finished
//! side effects are processed one at a time, so dedup, filtering and the list
//! update happen atomically for every trade.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use tradedge_core::{
    ChannelEvent, ChannelUpdate, ConnectionState, DispatcherPhase, EntitlementSnapshot, Session,
    Trade, TradeId, TradeOrigin,
};
use tradedge_gateway::{GatewayError, GatewayResult, LiveChannel, MessageSender, Notifier};

use crate::book::TradeBook;
use crate::bulk::BulkFetcher;
use crate::cache::{AlertCache, CacheError, CachedAlerts};
use crate::dedup::SeenRegistry;
use crate::entitlement::{EntitlementFilter, EntitlementRefresher, EntitlementStore};
use crate::metrics::AlertMetrics;
use crate::normalizer::TradeNormalizer;
use crate::sink::{AlertSink, ErrorSource};

const COMMAND_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Offset that defines the viewer's calendar day for the Today list.
    pub display_offset: FixedOffset,
    pub notification_title: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            display_offset: Local::now().offset().fix(),
            notification_title: "New trade alert".into(),
        }
    }
}

/// Collaborators wired into the dispatcher.
pub struct DispatcherDeps {
    pub bulk: Arc<BulkFetcher>,
    pub normalizer: Arc<TradeNormalizer>,
    pub refresher: Arc<EntitlementRefresher>,
    pub filter: EntitlementFilter,
    pub channel: Box<dyn LiveChannel>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub messenger: Option<Arc<dyn MessageSender>>,
    pub sink: Arc<dyn AlertSink>,
    pub metrics: AlertMetrics,
    /// Last-known lists used when the first bulk load of a session fails.
    pub cache: Option<Arc<dyn AlertCache>>,
}

/// Outcome of the notification permission request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PermissionState {
    #[default]
    Unknown,
    Pending,
    Granted,
    Denied,
    /// No notifier configured, or the request failed for another reason.
    Unavailable,
}

/// Point-in-time copy of the dispatcher state.
#[derive(Clone, Debug)]
pub struct DispatcherView {
    pub phase: DispatcherPhase,
    pub connection: ConnectionState,
    pub today: Vec<Trade>,
    pub all: Vec<Trade>,
    pub seen: usize,
    pub last_error: Option<String>,
    pub permission: PermissionState,
    pub generation: u64,
    /// A bulk load is running. Live delivery continues during reloads.
    pub bulk_in_flight: bool,
    /// The lists were seeded from the local cache after the bulk load failed.
    pub restored_from_cache: bool,
}

#[derive(Debug, Error)]
#[error("alert dispatcher is no longer running")]
pub struct DispatcherClosed;

#[derive(Debug)]
enum Command {
    Reset(Session),
    Reload,
    Reconnect,
    RefreshEntitlements,
    View(oneshot::Sender<DispatcherView>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable control handle used by the host.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    async fn send(&self, command: Command) -> Result<(), DispatcherClosed> {
        self.tx.send(command).await.map_err(|_| DispatcherClosed)
    }

    /// Start over for a (possibly different) user: clears seen ids and lists,
    /// then reloads bulk trades and entitlements.
    pub async fn reset(&self, session: Session) -> Result<(), DispatcherClosed> {
        self.send(Command::Reset(session)).await
    }

    /// Pull the bulk list again. Already seen trades are not delivered twice.
    pub async fn reload(&self) -> Result<(), DispatcherClosed> {
        self.send(Command::Reload).await
    }

    /// Restart the live channel after it gave up retrying.
    pub async fn reconnect(&self) -> Result<(), DispatcherClosed> {
        self.send(Command::Reconnect).await
    }

    /// Refresh entitlements out of band, e.g. after a completed payment.
    pub async fn refresh_entitlements(&self) -> Result<(), DispatcherClosed> {
        self.send(Command::RefreshEntitlements).await
    }

    pub async fn view(&self) -> Result<DispatcherView, DispatcherClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::View(tx)).await?;
        rx.await.map_err(|_| DispatcherClosed)
    }

    /// Disconnect the channel, stop timers and wait for the dispatcher to exit.
    pub async fn shutdown(&self) -> Result<(), DispatcherClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| DispatcherClosed)
    }
}

struct BulkOutcome {
    generation: u64,
    trades: GatewayResult<Vec<Trade>>,
    entitlements: GatewayResult<()>,
    cached: Option<Vec<Trade>>,
}

enum EffectOutcome {
    Permission(GatewayResult<()>),
    Notification {
        trade_id: Option<TradeId>,
        result: GatewayResult<()>,
    },
    Message {
        trade_id: TradeId,
        result: GatewayResult<()>,
    },
    Entitlements {
        generation: u64,
        result: GatewayResult<()>,
    },
    CacheSaved(Result<(), CacheError>),
}

pub struct AlertDispatcher {
    config: DispatcherConfig,
    bulk: Arc<BulkFetcher>,
    normalizer: Arc<TradeNormalizer>,
    refresher: Arc<EntitlementRefresher>,
    filter: EntitlementFilter,
    channel: Box<dyn LiveChannel>,
    notifier: Option<Arc<dyn Notifier>>,
    messenger: Option<Arc<dyn MessageSender>>,
    sink: Arc<dyn AlertSink>,
    metrics: AlertMetrics,
    cache: Option<Arc<dyn AlertCache>>,
    session: Session,
    generation: u64,
    phase: DispatcherPhase,
    connection: ConnectionState,
    channel_open: bool,
    permission: PermissionState,
    seen: SeenRegistry,
    book: TradeBook,
    last_error: Option<(ErrorSource, String)>,
    bulk_in_flight: bool,
    cache_primed: bool,
    restored_from_cache: bool,
    commands: mpsc::Receiver<Command>,
    bulk_tx: mpsc::UnboundedSender<BulkOutcome>,
    bulk_rx: mpsc::UnboundedReceiver<BulkOutcome>,
    bulk_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
    side_effects: JoinSet<EffectOutcome>,
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl AlertDispatcher {
    pub fn new(
        config: DispatcherConfig,
        deps: DispatcherDeps,
        session: Session,
    ) -> (Self, DispatcherHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (bulk_tx, bulk_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            config,
            bulk: deps.bulk,
            normalizer: deps.normalizer,
            refresher: deps.refresher,
            filter: deps.filter,
            channel: deps.channel,
            notifier: deps.notifier,
            messenger: deps.messenger,
            sink: deps.sink,
            metrics: deps.metrics,
            cache: deps.cache,
            session,
            generation: 0,
            phase: DispatcherPhase::Init,
            connection: ConnectionState::Disconnected,
            channel_open: true,
            permission: PermissionState::Unknown,
            seen: SeenRegistry::new(),
            book: TradeBook::new(),
            last_error: None,
            bulk_in_flight: false,
            cache_primed: false,
            restored_from_cache: false,
            commands,
            bulk_tx,
            bulk_rx,
            bulk_task: None,
            refresh_task: None,
            side_effects: JoinSet::new(),
            shutdown_ack: None,
        };
        (dispatcher, DispatcherHandle { tx })
    }

    /// Spawn the dispatcher onto the runtime.
    pub fn spawn(
        config: DispatcherConfig,
        deps: DispatcherDeps,
        session: Session,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (dispatcher, handle) = Self::new(config, deps, session);
        (handle, tokio::spawn(dispatcher.run()))
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!(user = %self.session.user_id, channel = self.channel.name(), "alert dispatcher started");
        self.sink.on_phase(self.phase);
        self.request_permission();
        self.begin_session();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(outcome) = self.bulk_rx.recv() => self.apply_bulk(outcome),
                update = self.channel.next_update(), if self.channel_open && self.phase == DispatcherPhase::Ready => {
                    match update {
                        Some(update) => self.handle_update(update),
                        None => {
                            info!(channel = self.channel.name(), "live channel closed");
                            self.channel_open = false;
                        }
                    }
                }
                Some(joined) = self.side_effects.join_next(), if !self.side_effects.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        self.teardown().await;
        if let Some(ack) = self.shutdown_ack.take() {
            let _ = ack.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Reset(session) => self.reset(session),
            Command::Reload => {
                info!(generation = self.generation, "reloading bulk trades");
                let initial = self.phase != DispatcherPhase::Ready;
                self.load_bulk(initial);
            }
            Command::Reconnect => self.reconnect_channel().await,
            Command::RefreshEntitlements => self.spawn_entitlement_refresh(),
            Command::View(reply) => {
                let _ = reply.send(self.view());
            }
            Command::Shutdown(ack) => {
                self.shutdown_ack = Some(ack);
                return false;
            }
        }
        true
    }

    /// Live updates wait until the first bulk load of the session is applied.
    fn begin_session(&mut self) {
        self.generation += 1;
        self.refresher.store().reset(self.generation);
        self.cache_primed = false;
        self.restored_from_cache = false;
        self.set_phase(DispatcherPhase::LoadingBulk);
        self.load_bulk(true);
    }

    fn reset(&mut self, session: Session) {
        info!(user = %session.user_id, "resetting alert session");
        self.abort_refresh();
        self.session = session;
        self.seen.clear();
        self.book.clear();
        self.clear_errors(&[ErrorSource::BulkFetch, ErrorSource::Entitlements]);
        self.begin_session();
        self.publish_lists(Utc::now());
    }

    /// Fetch the bulk list together with the session's entitlements so the
    /// snapshot is in place before the first row is filtered. On the initial
    /// load of a session the cache stands in for whatever failed.
    fn load_bulk(&mut self, initial: bool) {
        if let Some(task) = self.bulk_task.take() {
            task.abort();
        }
        self.bulk_in_flight = true;
        let bulk = self.bulk.clone();
        let refresher = self.refresher.clone();
        let cache = if initial { self.cache.clone() } else { None };
        let session = self.session.clone();
        let generation = self.generation;
        let tx = self.bulk_tx.clone();
        self.bulk_task = Some(tokio::spawn(async move {
            let (trades, entitlements) = tokio::join!(
                bulk.fetch_all(&session),
                refresher.refresh_now(&session, generation)
            );
            let cached = match cache {
                Some(cache) if trades.is_err() || entitlements.is_err() => {
                    load_fallback(
                        cache.as_ref(),
                        &session,
                        refresher.store(),
                        generation,
                        entitlements.is_err(),
                    )
                    .await
                }
                _ => None,
            };
            let _ = tx.send(BulkOutcome {
                generation,
                cached: cached.filter(|_| trades.is_err()),
                trades,
                entitlements,
            });
        }));
    }

    fn apply_bulk(&mut self, outcome: BulkOutcome) {
        if outcome.generation != self.generation {
            debug!(
                stale = outcome.generation,
                current = self.generation,
                "discarding bulk result from a previous session"
            );
            return;
        }
        self.bulk_task = None;
        self.bulk_in_flight = false;
        self.clear_errors(&[ErrorSource::BulkFetch, ErrorSource::Entitlements]);
        let now = Utc::now();
        if let Err(err) = &outcome.entitlements {
            self.report_error(ErrorSource::Entitlements, err);
        }
        let snapshot = self.refresher.store().snapshot();
        match outcome.trades {
            Ok(trades) => {
                let received = trades.len();
                let accepted: Vec<Trade> = trades
                    .into_iter()
                    .filter_map(|trade| self.admit(trade, &snapshot, now))
                    .collect();
                info!(received, accepted = accepted.len(), "bulk trades applied");
                self.book.merge_bulk(accepted);
                self.cache_primed = true;
                self.save_cache();
            }
            Err(err) => {
                self.report_error(ErrorSource::BulkFetch, &err);
                if let Some(cached) = outcome.cached {
                    let restored: Vec<Trade> = cached
                        .into_iter()
                        .filter_map(|trade| self.admit(trade, &snapshot, now))
                        .collect();
                    info!(restored = restored.len(), "lists restored from local cache");
                    self.book.merge_bulk(restored);
                    self.restored_from_cache = true;
                    self.cache_primed = true;
                }
            }
        }
        self.publish_lists(now);
        if self.refresh_task.is_none() {
            self.refresh_task = Some(
                self.refresher
                    .clone()
                    .spawn_periodic(self.session.clone(), self.generation),
            );
        }
        self.set_phase(DispatcherPhase::Ready);
    }

    /// Dedup then filter. Rejected trades stay marked as seen.
    fn admit(
        &mut self,
        trade: Trade,
        snapshot: &EntitlementSnapshot,
        now: DateTime<Utc>,
    ) -> Option<Trade> {
        if !self.seen.mark_seen(trade.id.clone()) {
            self.metrics.inc_duplicate();
            debug!(trade_id = %trade.id, "dropping duplicate trade");
            return None;
        }
        if !self.filter.is_visible(&trade, snapshot, now) {
            self.metrics.inc_filtered();
            debug!(trade_id = %trade.id, tags = ?trade.entitlement_tags, "trade not entitled");
            return None;
        }
        self.metrics.inc_delivered(trade.origin);
        Some(trade)
    }

    fn handle_update(&mut self, update: ChannelUpdate) {
        match update {
            ChannelUpdate::State(state) => self.on_connection_state(state),
            ChannelUpdate::Event(ChannelEvent::NewTrade(raw)) => self.on_live_trade(&raw),
            ChannelUpdate::Event(ChannelEvent::Announcement(payload)) => {
                self.sink.on_announcement(&payload);
                let title = payload
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Announcement")
                    .to_string();
                self.spawn_notification(None, title, announcement_text(&payload));
            }
            ChannelUpdate::Event(ChannelEvent::FollowUpDue(payload)) => {
                self.sink.on_follow_up(&payload);
            }
            ChannelUpdate::Event(ChannelEvent::PendingFollowUps(payload)) => {
                self.sink.on_pending_count(&payload);
            }
            ChannelUpdate::Event(ChannelEvent::Other { name, .. }) => {
                debug!(event = %name, "ignoring channel event");
            }
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        if state != self.connection {
            info!(channel = self.channel.name(), state = %state, "channel state changed");
        }
        self.connection = state;
        self.metrics.update_connection_state(state);
        self.sink.on_connection_state(state);
        if state == ConnectionState::Connected {
            self.clear_errors(&[ErrorSource::Channel]);
        }
        if state == ConnectionState::Error {
            let err = GatewayError::Network(format!(
                "channel {} stopped reconnecting",
                self.channel.name()
            ));
            self.report_error(ErrorSource::Channel, &err);
        }
    }

    fn on_live_trade(&mut self, raw: &Value) {
        let now = Utc::now();
        self.metrics.inc_received(TradeOrigin::Live);
        let trade = match self.normalizer.normalize(raw, TradeOrigin::Live, now) {
            Ok(trade) => trade,
            Err(err) => {
                self.metrics.inc_normalize_failure();
                warn!(error = %err, "rejecting live trade payload");
                return;
            }
        };
        let snapshot = self.refresher.store().snapshot();
        let Some(trade) = self.admit(trade, &snapshot, now) else {
            return;
        };
        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            direction = %trade.direction,
            "new trade alert"
        );
        self.book.prepend(trade.clone());
        self.sink.on_new_trade(&trade);
        self.publish_lists(now);
        self.save_cache();

        let title = self.config.notification_title.clone();
        self.spawn_notification(Some(trade.id.clone()), title, trade.headline());
        self.spawn_message(&trade);
    }

    fn request_permission(&mut self) {
        let Some(notifier) = self.notifier.clone() else {
            self.permission = PermissionState::Unavailable;
            return;
        };
        self.permission = PermissionState::Pending;
        self.side_effects.spawn(async move {
            EffectOutcome::Permission(notifier.request_permission().await)
        });
    }

    fn spawn_notification(&mut self, trade_id: Option<TradeId>, title: String, body: String) {
        if self.permission != PermissionState::Granted {
            debug!(permission = ?self.permission, "skipping native notification");
            return;
        }
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        self.side_effects.spawn(async move {
            let result = notifier.show(&title, &body).await;
            EffectOutcome::Notification { trade_id, result }
        });
    }

    fn spawn_message(&mut self, trade: &Trade) {
        let Some(messenger) = self.messenger.clone() else {
            return;
        };
        let Some(phone) = self.session.phone_digits() else {
            debug!(trade_id = %trade.id, "no usable phone number; skipping outbound message");
            return;
        };
        let parameters = template_parameters(trade);
        let trade_id = trade.id.clone();
        self.side_effects.spawn(async move {
            let result = messenger.send_template(&phone, &parameters).await;
            EffectOutcome::Message { trade_id, result }
        });
    }

    fn save_cache(&mut self) {
        if !self.cache_primed {
            return;
        }
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let entry = CachedAlerts {
            user_id: self.session.user_id.clone(),
            saved_at: Utc::now(),
            trades: self.book.all().to_vec(),
            snapshot: self.refresher.store().snapshot().as_ref().clone(),
        };
        self.side_effects
            .spawn(async move { EffectOutcome::CacheSaved(cache.save(&entry).await) });
    }

    fn spawn_entitlement_refresh(&mut self) {
        let refresher = self.refresher.clone();
        let session = self.session.clone();
        let generation = self.generation;
        self.side_effects.spawn(async move {
            let result = refresher.refresh_now(&session, generation).await;
            EffectOutcome::Entitlements { generation, result }
        });
    }

    fn reap(&mut self, joined: Result<EffectOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                if !err.is_cancelled() {
                    warn!(error = %err, "side effect task failed");
                }
                return;
            }
        };
        match outcome {
            EffectOutcome::Permission(Ok(())) => {
                info!("notification permission granted");
                self.permission = PermissionState::Granted;
            }
            EffectOutcome::Permission(Err(err)) => {
                self.permission = match err {
                    GatewayError::PermissionDenied(_) => PermissionState::Denied,
                    _ => PermissionState::Unavailable,
                };
                self.metrics.inc_side_effect_failure("permission");
                warn!(error = %err, "notifications unavailable; delivering in-app only");
                self.sink.on_error(ErrorSource::Permission, &err);
            }
            EffectOutcome::Notification {
                trade_id,
                result: Err(err),
            } => {
                self.metrics.inc_side_effect_failure("notification");
                warn!(trade_id = ?trade_id, error = %err, "native notification failed");
                self.sink.on_error(ErrorSource::Notification, &err);
            }
            EffectOutcome::Message {
                trade_id,
                result: Err(err),
            } => {
                self.metrics.inc_side_effect_failure("outbound_message");
                warn!(trade_id = %trade_id, error = %err, "outbound message failed");
                self.sink.on_error(ErrorSource::OutboundMessage, &err);
            }
            EffectOutcome::Message {
                trade_id,
                result: Ok(()),
            } => {
                debug!(trade_id = %trade_id, "outbound message sent");
            }
            EffectOutcome::Entitlements {
                generation,
                result: Err(err),
            } if generation == self.generation => {
                self.report_error(ErrorSource::Entitlements, &err);
            }
            EffectOutcome::CacheSaved(Err(err)) => {
                self.metrics.inc_side_effect_failure("cache");
                warn!(error = %err, "failed to persist alert cache");
            }
            EffectOutcome::Notification { .. }
            | EffectOutcome::Entitlements { .. }
            | EffectOutcome::CacheSaved(Ok(())) => {}
        }
    }

    async fn reconnect_channel(&mut self) {
        info!(channel = self.channel.name(), "manual channel reconnect requested");
        match self.channel.reconnect().await {
            Ok(()) => self.channel_open = true,
            Err(err) => self.report_error(ErrorSource::Channel, &err),
        }
    }

    async fn teardown(&mut self) {
        self.set_phase(DispatcherPhase::Teardown);
        info!("alert dispatcher stopping");
        self.channel.disconnect().await;
        self.channel_open = false;
        self.abort_refresh();
        if let Some(task) = self.bulk_task.take() {
            task.abort();
        }
        // In-flight notifications and messages are left to finish on their own.
        self.side_effects.detach_all();
    }

    fn abort_refresh(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }

    fn report_error(&mut self, source: ErrorSource, err: &GatewayError) {
        warn!(source = source.as_str(), error = %err, "alert pipeline error");
        self.last_error = Some((source, format!("{}: {err}", source.as_str())));
        self.sink.on_error(source, err);
    }

    fn clear_errors(&mut self, sources: &[ErrorSource]) {
        if matches!(&self.last_error, Some((source, _)) if sources.contains(source)) {
            self.last_error = None;
        }
    }

    fn publish_lists(&self, now: DateTime<Utc>) {
        let today = self.book.today(now, self.config.display_offset);
        self.metrics.update_listed(today.len(), self.book.len());
        self.sink.on_lists_updated(&today, self.book.all());
    }

    fn set_phase(&mut self, phase: DispatcherPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "dispatcher phase changed");
            self.phase = phase;
            self.sink.on_phase(phase);
        }
    }

    fn view(&self) -> DispatcherView {
        DispatcherView {
            phase: self.phase,
            connection: self.connection,
            today: self.book.today(Utc::now(), self.config.display_offset),
            all: self.book.all().to_vec(),
            seen: self.seen.len(),
            last_error: self.last_error.as_ref().map(|(_, message)| message.clone()),
            permission: self.permission,
            generation: self.generation,
            bulk_in_flight: self.bulk_in_flight,
            restored_from_cache: self.restored_from_cache,
        }
    }
}

async fn load_fallback(
    cache: &dyn AlertCache,
    session: &Session,
    store: &EntitlementStore,
    generation: u64,
    install_snapshot: bool,
) -> Option<Vec<Trade>> {
    let entry = match cache.load(&session.user_id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(err) => {
            warn!(user = %session.user_id, error = %err, "ignoring unreadable alert cache");
            return None;
        }
    };
    if install_snapshot && store.install(generation, entry.snapshot) {
        info!(user = %session.user_id, saved_at = %entry.saved_at, "entitlements restored from local cache");
    }
    Some(entry.trades)
}

/// Template parameters: symbol, direction, entry, target, stop.
fn template_parameters(trade: &Trade) -> Value {
    json!([
        trade.symbol,
        trade.direction.as_str(),
        trade.entry_price.to_string(),
        trade.target_price.to_string(),
        trade.stop_loss.to_string(),
    ])
}

fn announcement_text(payload: &Value) -> String {
    ["message", "body", "text"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}
