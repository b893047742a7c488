use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use tradedge_core::{Session, Trade, TradeOrigin};
use tradedge_gateway::{GatewayError, GatewayResult, TradeFeed};

use crate::metrics::AlertMetrics;
use crate::normalizer::TradeNormalizer;

/// Bounded retry for the initial bulk pull.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Pulls the full trade list and normalizes every row.
pub struct BulkFetcher {
    feed: Arc<dyn TradeFeed>,
    normalizer: Arc<TradeNormalizer>,
    policy: RetryPolicy,
    metrics: AlertMetrics,
}

impl BulkFetcher {
    pub fn new(
        feed: Arc<dyn TradeFeed>,
        normalizer: Arc<TradeNormalizer>,
        policy: RetryPolicy,
        metrics: AlertMetrics,
    ) -> Self {
        Self {
            feed,
            normalizer,
            policy,
            metrics,
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch with retries. Only retryable errors are retried; rows the
    /// normalizer rejects are skipped.
    pub async fn fetch_all(&self, session: &Session) -> GatewayResult<Vec<Trade>> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.metrics.inc_bulk_attempt();
            let result = match timeout(self.policy.attempt_timeout, self.feed.fetch_all(session)).await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Network(format!(
                    "bulk fetch timed out after {:?}",
                    self.policy.attempt_timeout
                ))),
            };
            match result {
                Ok(rows) => {
                    info!(feed = self.feed.name(), rows = rows.len(), attempt, "bulk fetch completed");
                    return Ok(self.normalize_rows(rows));
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        feed = self.feed.name(),
                        attempt,
                        error = %err,
                        retry_in = ?delay,
                        "bulk fetch failed; retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    self.metrics.inc_bulk_failure();
                    warn!(feed = self.feed.name(), attempt, error = %err, "bulk fetch gave up");
                    return Err(err);
                }
            }
        }
    }

    fn normalize_rows(&self, rows: Vec<serde_json::Value>) -> Vec<Trade> {
        let received_at = Utc::now();
        rows.into_iter()
            .filter_map(|row| {
                self.metrics.inc_received(TradeOrigin::Bulk);
                match self.normalizer.normalize(&row, TradeOrigin::Bulk, received_at) {
                    Ok(trade) => Some(trade),
                    Err(err) => {
                        self.metrics.inc_normalize_failure();
                        debug!(error = %err, "skipping bulk row");
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testkit::StaticFeed;

    fn fetcher(feed: Arc<StaticFeed>, metrics: AlertMetrics) -> BulkFetcher {
        BulkFetcher::new(
            feed,
            Arc::new(TradeNormalizer::default()),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                attempt_timeout: Duration::from_secs(1),
            },
            metrics,
        )
    }

    #[test]
    fn delay_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_network_errors_then_succeeds() {
        let feed = Arc::new(StaticFeed::new(vec![
            json!({"trade_id": 1, "stock_symbol": "INFY", "trade_type": "buy"}),
            json!({"trade_id": 2, "trade_type": "sell"}),
        ]));
        feed.fail_next(GatewayError::Network("reset".into()));
        let metrics = AlertMetrics::new();
        let trades = fetcher(feed.clone(), metrics.clone())
            .fetch_all(&Session::new("42", "token"))
            .await
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "1");
        assert_eq!(feed.calls(), 2);
        assert_eq!(metrics.bulk_attempts(), 2);
        assert_eq!(metrics.normalize_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let feed = Arc::new(StaticFeed::new(Vec::new()));
        for _ in 0..5 {
            feed.fail_next(GatewayError::Network("down".into()));
        }
        let err = fetcher(feed.clone(), AlertMetrics::new())
            .fetch_all(&Session::new("42", "token"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let feed = Arc::new(StaticFeed::new(Vec::new()));
        feed.fail_next(GatewayError::MalformedResponse("{}".into()));
        let err = fetcher(feed.clone(), AlertMetrics::new())
            .fetch_all(&Session::new("42", "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
        assert_eq!(feed.calls(), 1);
    }
}
