//! Entitlement snapshot storage, periodic refresh and visibility filtering.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tradedge_core::{EntitlementSnapshot, Session, Trade, UntaggedTradePolicy};
use tradedge_gateway::{EntitlementSource, GatewayResult};

use crate::metrics::AlertMetrics;

/// Decides whether a trade is visible under a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntitlementFilter {
    policy: UntaggedTradePolicy,
}

impl EntitlementFilter {
    #[must_use]
    pub fn new(policy: UntaggedTradePolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> UntaggedTradePolicy {
        self.policy
    }

    /// `now` is captured once by the caller for the whole dispatch cycle.
    #[must_use]
    pub fn is_visible(
        &self,
        trade: &Trade,
        snapshot: &EntitlementSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        if trade.is_untagged() {
            return match self.policy {
                UntaggedTradePolicy::AnyActivePackage => snapshot.has_active_package(now),
                UntaggedTradePolicy::Deny => false,
                UntaggedTradePolicy::Everyone => true,
            };
        }
        trade
            .entitlement_tags
            .iter()
            .any(|tag| snapshot.is_active(tag, now))
    }
}

#[derive(Debug)]
struct Installed {
    generation: u64,
    snapshot: Arc<EntitlementSnapshot>,
}

/// Latest snapshot of the signed-in user, shared between the refresher and the dispatcher.
///
/// Snapshots are swapped whole; the lock is held only for the swap.
#[derive(Clone, Debug)]
pub struct EntitlementStore {
    inner: Arc<RwLock<Installed>>,
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Installed {
                generation: 0,
                snapshot: Arc::new(EntitlementSnapshot::empty()),
            })),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<EntitlementSnapshot> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.snapshot.clone()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.generation
    }

    /// Install a snapshot fetched for `generation`. Returns `false` when the
    /// store has moved on to another session and the snapshot was dropped.
    pub fn install(&self, generation: u64, snapshot: EntitlementSnapshot) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.generation != generation {
            return false;
        }
        guard.snapshot = Arc::new(snapshot);
        true
    }

    /// Start a new session: forget the previous user's packages.
    pub fn reset(&self, generation: u64) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.generation = generation;
        guard.snapshot = Arc::new(EntitlementSnapshot::empty());
    }
}

/// Pulls snapshots from an [`EntitlementSource`] into an [`EntitlementStore`].
pub struct EntitlementRefresher {
    source: Arc<dyn EntitlementSource>,
    store: EntitlementStore,
    interval: Duration,
    metrics: AlertMetrics,
}

impl EntitlementRefresher {
    pub fn new(
        source: Arc<dyn EntitlementSource>,
        store: EntitlementStore,
        interval: Duration,
        metrics: AlertMetrics,
    ) -> Self {
        Self {
            source,
            store,
            interval,
            metrics,
        }
    }

    #[must_use]
    pub fn store(&self) -> &EntitlementStore {
        &self.store
    }

    /// Fetch and install a snapshot. On failure the previous snapshot stays in place.
    pub async fn refresh_now(&self, session: &Session, generation: u64) -> GatewayResult<()> {
        match self.source.fetch_snapshot(session).await {
            Ok(snapshot) => {
                self.metrics.inc_entitlement_refresh(true);
                let packages = snapshot.purchased_subtype_ids.len();
                if self.store.install(generation, snapshot) {
                    info!(user = %session.user_id, packages, "entitlements refreshed");
                } else {
                    debug!(generation, "discarding entitlements fetched for a previous session");
                }
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_entitlement_refresh(false);
                warn!(user = %session.user_id, error = %err, "entitlement refresh failed");
                Err(err)
            }
        }
    }

    /// Refresh on a fixed timer until the handle is aborted. The first tick
    /// fires one interval from now; the initial load is the caller's job.
    pub fn spawn_periodic(self: Arc<Self>, session: Session, generation: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.store.generation() != generation {
                    break;
                }
                let _ = self.refresh_now(&session, generation).await;
            }
        })
    }
}
