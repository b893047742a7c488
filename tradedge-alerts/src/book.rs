use chrono::{DateTime, FixedOffset, Utc};
use tradedge_core::Trade;

/// Accepted trades, newest first.
///
/// "Today" is derived from the "All" list on every read, so it is always a
/// subset partitioned purely by `created_at`.
#[derive(Debug, Default)]
pub struct TradeBook {
    all: Vec<Trade>,
}

impl TradeBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a bulk batch, keeping the list ordered by `created_at` descending.
    ///
    /// The sort is stable: entries with equal timestamps keep their relative order.
    pub fn merge_bulk(&mut self, trades: impl IntoIterator<Item = Trade>) {
        self.all.extend(trades);
        self.all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Live trades go to the front regardless of their timestamp.
    pub fn prepend(&mut self, trade: Trade) {
        self.all.insert(0, trade);
    }

    #[must_use]
    pub fn all(&self) -> &[Trade] {
        &self.all
    }

    #[must_use]
    pub fn today(&self, now: DateTime<Utc>, offset: FixedOffset) -> Vec<Trade> {
        self.all
            .iter()
            .filter(|trade| trade.is_same_day(now, offset))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.all.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn clear(&mut self) {
        self.all.clear();
    }
}
