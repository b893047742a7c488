use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use tradedge_core::{ConnectionState, TradeOrigin};

/// Prometheus metrics collected by the alert pipeline.
#[derive(Clone)]
pub struct AlertMetrics {
    registry: Registry,
    trades_received: IntCounterVec,
    trades_delivered: IntCounterVec,
    duplicates: IntCounter,
    filtered: IntCounter,
    normalize_failures: IntCounter,
    side_effect_failures: IntCounterVec,
    bulk_attempts: IntCounter,
    bulk_failures: IntCounter,
    entitlement_refreshes: IntCounterVec,
    channel_connected: IntGauge,
    trades_listed: IntGaugeVec,
}

impl AlertMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let trades_received = IntCounterVec::new(
            Opts::new(
                "tradedge_trades_received_total",
                "Raw trade payloads received",
            ),
            &["origin"],
        )
        .unwrap();
        let trades_delivered = IntCounterVec::new(
            Opts::new(
                "tradedge_trades_delivered_total",
                "Trades that passed dedup and entitlement filtering",
            ),
            &["origin"],
        )
        .unwrap();
        let duplicates = IntCounter::new(
            "tradedge_trades_duplicate_total",
            "Trades dropped because their id was already seen",
        )
        .unwrap();
        let filtered = IntCounter::new(
            "tradedge_trades_filtered_total",
            "Trades hidden by the entitlement filter",
        )
        .unwrap();
        let normalize_failures = IntCounter::new(
            "tradedge_normalize_failures_total",
            "Trade payloads rejected by the normalizer",
        )
        .unwrap();
        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "tradedge_side_effect_failures_total",
                "Failed notifications, outbound messages and permission requests",
            ),
            &["effect"],
        )
        .unwrap();
        let bulk_attempts =
            IntCounter::new("tradedge_bulk_attempts_total", "Bulk fetch attempts").unwrap();
        let bulk_failures = IntCounter::new(
            "tradedge_bulk_failures_total",
            "Bulk loads that exhausted their retries",
        )
        .unwrap();
        let entitlement_refreshes = IntCounterVec::new(
            Opts::new(
                "tradedge_entitlement_refreshes_total",
                "Entitlement snapshot refreshes",
            ),
            &["outcome"],
        )
        .unwrap();
        let channel_connected = IntGauge::new(
            "tradedge_channel_connected",
            "Status of the broadcast channel (1=connected, 0=otherwise)",
        )
        .unwrap();
        let trades_listed = IntGaugeVec::new(
            Opts::new("tradedge_trades_listed", "Trades currently listed"),
            &["list"],
        )
        .unwrap();

        registry.register(Box::new(trades_received.clone())).unwrap();
        registry
            .register(Box::new(trades_delivered.clone()))
            .unwrap();
        registry.register(Box::new(duplicates.clone())).unwrap();
        registry.register(Box::new(filtered.clone())).unwrap();
        registry
            .register(Box::new(normalize_failures.clone()))
            .unwrap();
        registry
            .register(Box::new(side_effect_failures.clone()))
            .unwrap();
        registry.register(Box::new(bulk_attempts.clone())).unwrap();
        registry.register(Box::new(bulk_failures.clone())).unwrap();
        registry
            .register(Box::new(entitlement_refreshes.clone()))
            .unwrap();
        registry
            .register(Box::new(channel_connected.clone()))
            .unwrap();
        registry.register(Box::new(trades_listed.clone())).unwrap();

        Self {
            registry,
            trades_received,
            trades_delivered,
            duplicates,
            filtered,
            normalize_failures,
            side_effect_failures,
            bulk_attempts,
            bulk_failures,
            entitlement_refreshes,
            channel_connected,
            trades_listed,
        }
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn inc_received(&self, origin: TradeOrigin) {
        self.trades_received
            .with_label_values(&[origin_label(origin)])
            .inc();
    }

    pub fn inc_delivered(&self, origin: TradeOrigin) {
        self.trades_delivered
            .with_label_values(&[origin_label(origin)])
            .inc();
    }

    pub fn delivered(&self, origin: TradeOrigin) -> u64 {
        self.trades_delivered
            .with_label_values(&[origin_label(origin)])
            .get()
    }

    pub fn inc_duplicate(&self) {
        self.duplicates.inc();
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.get()
    }

    pub fn inc_filtered(&self) {
        self.filtered.inc();
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.get()
    }

    pub fn inc_normalize_failure(&self) {
        self.normalize_failures.inc();
    }

    pub fn normalize_failures(&self) -> u64 {
        self.normalize_failures.get()
    }

    pub fn inc_side_effect_failure(&self, effect: &str) {
        self.side_effect_failures.with_label_values(&[effect]).inc();
    }

    pub fn side_effect_failures(&self, effect: &str) -> u64 {
        self.side_effect_failures.with_label_values(&[effect]).get()
    }

    pub fn inc_bulk_attempt(&self) {
        self.bulk_attempts.inc();
    }

    pub fn bulk_attempts(&self) -> u64 {
        self.bulk_attempts.get()
    }

    pub fn inc_bulk_failure(&self) {
        self.bulk_failures.inc();
    }

    pub fn inc_entitlement_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.entitlement_refreshes
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        let value = i64::from(state == ConnectionState::Connected);
        self.channel_connected.set(value);
    }

    pub fn update_listed(&self, today: usize, all: usize) {
        self.trades_listed
            .with_label_values(&["today"])
            .set(today as i64);
        self.trades_listed.with_label_values(&["all"]).set(all as i64);
    }
}

impl Default for AlertMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn origin_label(origin: TradeOrigin) -> &'static str {
    match origin {
        TradeOrigin::Bulk => "bulk",
        TradeOrigin::Live => "live",
    }
}
