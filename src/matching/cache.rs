//! Local cache of the external bank feed with throttled refresh

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ReconcilerConfig;
use crate::traits::*;
use crate::types::*;

/// How an auto-sync request was satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// The upstream feed was fetched and the cache refreshed
    Refreshed {
        /// Number of rows written to the cache
        upserted: usize,
    },
    /// The cache was fresh enough, the upstream feed was not contacted
    UsedCache,
    /// The upstream fetch failed, previously cached data is being served
    StaleCache {
        /// Description of the upstream failure
        error: String,
    },
}

/// Cache manager for the external bank feed
///
/// Keeps a local copy of the upstream transactions so that candidate search
/// never blocks on the bank's API, and throttles refreshes so that a burst
/// of reconciliation activity does not hammer the upstream service.
pub struct BankFeedCache<F: BankFeedStore, C: BankFeedClient> {
    store: F,
    client: C,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl<F: BankFeedStore, C: BankFeedClient> BankFeedCache<F, C> {
    /// Create a new cache with the default configuration and system clock
    pub fn new(store: F, client: C) -> Self {
        Self::with_config(store, client, ReconcilerConfig::default(), Arc::new(SystemClock))
    }

    /// Create a new cache with custom configuration and clock
    pub fn with_config(
        store: F,
        client: C,
        config: ReconcilerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            clock,
            config,
        }
    }

    /// Fetch the upstream feed and refresh the cache
    ///
    /// Rows are upserted by external ID, so re-syncing the same window is
    /// idempotent. Failed fetches are retried up to the configured count;
    /// the watermark only advances after the whole batch is cached, so an
    /// interrupted sync is retried in full on the next call.
    pub async fn sync(&mut self) -> ReconResult<usize> {
        let since = self.store.last_sync().await?;

        let mut attempt: u32 = 0;
        let batch = loop {
            match self.client.fetch_transactions(since).await {
                Ok(batch) => break batch,
                Err(ReconError::ExternalService(msg)) if attempt < self.config.fetch_retries => {
                    attempt += 1;
                    warn!(attempt, error = %msg, "bank feed fetch failed, retrying");
                }
                Err(err) => return Err(err),
            }
        };

        let mut upserted = 0;
        for tx in &batch {
            self.store.upsert_bank_tx(tx).await?;
            upserted += 1;
        }

        self.store.set_last_sync(self.clock.now()).await?;
        debug!(upserted, "bank feed sync complete");

        Ok(upserted)
    }

    /// Refresh the cache only if it is older than the configured threshold
    ///
    /// When the refresh fails but a previous successful sync exists, the
    /// stale cache is served rather than failing the caller's request. With
    /// no cached data at all the failure propagates.
    pub async fn auto_sync(&mut self) -> ReconResult<SyncOutcome> {
        let last = self.store.last_sync().await?;

        if let Some(last) = last {
            if self.clock.now() - last < self.config.auto_sync_threshold() {
                debug!("bank feed cache is fresh, skipping sync");
                return Ok(SyncOutcome::UsedCache);
            }
        }

        match self.sync().await {
            Ok(upserted) => Ok(SyncOutcome::Refreshed { upserted }),
            Err(err) if last.is_some() => {
                warn!(error = %err, "bank feed sync failed, serving stale cache");
                Ok(SyncOutcome::StaleCache {
                    error: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// List cached bank transactions matching a filter, most recent first
    pub async fn get_cached(&self, filter: &BankTxFilter) -> ReconResult<Vec<BankTransaction>> {
        self.store.cached_bank_txs(filter).await
    }

    /// Get a single cached bank transaction by its external ID
    pub async fn get_bank_tx(&self, external_id: &str) -> ReconResult<Option<BankTransaction>> {
        self.store.get_bank_tx(external_id).await
    }

    /// When the last successful sync completed, if ever
    pub async fn last_sync(&self) -> ReconResult<Option<NaiveDateTime>> {
        self.store.last_sync().await
    }

    /// Check that the upstream feed is reachable
    pub async fn test_connection(&self) -> ReconResult<()> {
        self.client.test_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::utils::{MemoryStore, ScriptedBankFeed};
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn dt(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn bank_tx(id: &str, amount: i64) -> BankTransaction {
        BankTransaction::new(
            id.to_string(),
            BigDecimal::from(amount),
            BankTxSide::Debit,
            dt(1, 9),
            BankTxStatus::Completed,
            format!("card payment {}", id),
        )
    }

    fn bank_tx_settled(id: &str, day: u32) -> BankTransaction {
        BankTransaction::new(
            id.to_string(),
            BigDecimal::from(100),
            BankTxSide::Debit,
            dt(day, 9),
            BankTxStatus::Completed,
            format!("card payment {}", id),
        )
    }

    #[tokio::test]
    async fn sync_is_idempotent_per_external_id() {
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_batch(vec![bank_tx("bt-1", 100), bank_tx("bt-2", 200)]);
        feed.push_batch(vec![bank_tx("bt-1", 100), bank_tx("bt-2", 200)]);

        let mut cache = BankFeedCache::new(store, feed);
        cache.sync().await.unwrap();
        cache.sync().await.unwrap();

        let cached = cache.get_cached(&BankTxFilter::default()).await.unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn get_cached_filters_by_settlement_date_range() {
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_batch(vec![
            bank_tx_settled("bt-1", 1),
            bank_tx_settled("bt-2", 2),
            bank_tx_settled("bt-3", 3),
            bank_tx_settled("bt-4", 4),
        ]);

        let mut cache = BankFeedCache::new(store, feed);
        cache.sync().await.unwrap();

        // Both bounds are inclusive, results stay settled-descending
        let filter = BankTxFilter {
            settled_after: Some(dt(2, 9)),
            settled_before: Some(dt(3, 9)),
            ..BankTxFilter::default()
        };
        let cached = cache.get_cached(&filter).await.unwrap();

        let ids: Vec<&str> = cached.iter().map(|tx| tx.external_id.as_str()).collect();
        assert_eq!(ids, vec!["bt-3", "bt-2"]);
    }

    #[tokio::test]
    async fn auto_sync_skips_fetch_within_threshold() {
        let clock = ManualClock::new(dt(2, 10));
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_batch(vec![bank_tx("bt-1", 100)]);

        let mut cache = BankFeedCache::with_config(
            store,
            feed,
            ReconcilerConfig::default(),
            Arc::new(clock.clone()),
        );

        let first = cache.auto_sync().await.unwrap();
        assert_eq!(first, SyncOutcome::Refreshed { upserted: 1 });

        // One minute later, well inside the five minute default threshold
        clock.advance(chrono::Duration::minutes(1));
        let second = cache.auto_sync().await.unwrap();
        assert_eq!(second, SyncOutcome::UsedCache);

        clock.advance(chrono::Duration::minutes(10));
        let third = cache.auto_sync().await.unwrap();
        assert_eq!(third, SyncOutcome::Refreshed { upserted: 0 });
    }

    #[tokio::test]
    async fn auto_sync_serves_stale_cache_after_upstream_failure() {
        let clock = ManualClock::new(dt(2, 10));
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_batch(vec![bank_tx("bt-1", 100)]);
        feed.push_failure("gateway timeout");

        let config = ReconcilerConfig {
            fetch_retries: 0,
            ..ReconcilerConfig::default()
        };
        let mut cache = BankFeedCache::with_config(store, feed, config, Arc::new(clock.clone()));

        cache.auto_sync().await.unwrap();
        let watermark = cache.last_sync().await.unwrap();
        assert_eq!(watermark, Some(dt(2, 10)));

        clock.advance(chrono::Duration::minutes(10));

        match cache.auto_sync().await.unwrap() {
            SyncOutcome::StaleCache { error } => assert!(error.contains("gateway timeout")),
            other => panic!("expected stale cache, got {:?}", other),
        }

        // The cached rows are still served and the failed attempt has not
        // advanced the watermark
        let cached = cache.get_cached(&BankTxFilter::default()).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cache.last_sync().await.unwrap(), watermark);
    }

    #[tokio::test]
    async fn auto_sync_propagates_failure_with_empty_cache() {
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_failure("connection refused");

        let config = ReconcilerConfig {
            fetch_retries: 0,
            ..ReconcilerConfig::default()
        };
        let mut cache = BankFeedCache::with_config(
            store,
            feed,
            config,
            Arc::new(ManualClock::new(dt(2, 10))),
        );

        let result = cache.auto_sync().await;
        assert!(matches!(result, Err(ReconError::ExternalService(_))));
    }

    #[tokio::test]
    async fn sync_retries_before_giving_up() {
        let store = MemoryStore::new();
        let mut feed = ScriptedBankFeed::new();
        feed.push_failure("flaky gateway");
        feed.push_batch(vec![bank_tx("bt-1", 100)]);

        let mut cache = BankFeedCache::new(store, feed);
        let upserted = cache.sync().await.unwrap();
        assert_eq!(upserted, 1);
    }
}
