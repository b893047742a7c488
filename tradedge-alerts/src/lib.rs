//! Real-time trade-alert pipeline.
//!
//! Raw rows from the bulk feed and events from the live channel flow through
//! the [`TradeNormalizer`], the [`SeenRegistry`] and the [`EntitlementFilter`]
//! before the [`AlertDispatcher`] updates its [`TradeBook`] and fans out side
//! effects.

pub mod book;
pub mod bulk;
pub mod cache;
pub mod dedup;
pub mod dispatcher;
pub mod entitlement;
pub mod metrics;
pub mod normalizer;
pub mod sink;

pub use book::TradeBook;
pub use bulk::{BulkFetcher, RetryPolicy};
pub use cache::{AlertCache, CacheError, CachedAlerts, JsonFileCache};
pub use dedup::SeenRegistry;
pub use dispatcher::{
    AlertDispatcher, DispatcherClosed, DispatcherConfig, DispatcherDeps, DispatcherHandle,
    DispatcherView, PermissionState,
};
pub use entitlement::{EntitlementFilter, EntitlementRefresher, EntitlementStore};
pub use metrics::AlertMetrics;
pub use normalizer::{
    NormalizeError, NormalizerDefaults, TradeNormalizer, DEFAULT_SUPPORT_NUMBER,
};
pub use sink::{AlertSink, ErrorSource};

#[cfg(test)]
mod testkit;
