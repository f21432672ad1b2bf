//! Historic price service.
//!
//! Domain adapter over the generic [`ItemCache`]: encodes asset/timestamp
//! pairs into cache keys, turns a batch of keys into one historic-rates
//! task, and invalidates the cache when the display currency changes
//! (every cached price is denominated in it).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cache::{BatchFetcher, CacheKey, CacheStats, FetchedItem, ItemCache};
use crate::errors::{PriceCacheError, Result};
use crate::notifications::{Notification, NotificationSink};
use crate::task::{TaskError, TaskExecutor, TaskMeta, TaskRequest, TaskType};

/// Separator between the asset symbol and the timestamp inside a cache key.
const KEY_SEPARATOR: char = '#';

/// Notification title for historic price queries.
const TASK_TITLE: &str = "Historic price query";

/// Encodes an asset/timestamp pair into its cache key.
pub fn create_key(from_asset: &str, timestamp: i64) -> CacheKey {
    format!("{from_asset}{KEY_SEPARATOR}{timestamp}")
}

/// Decodes a cache key back into its asset/timestamp pair.
pub fn parse_key(key: &str) -> Result<(String, i64)> {
    let (from_asset, timestamp) = key
        .split_once(KEY_SEPARATOR)
        .ok_or_else(|| PriceCacheError::InvalidCacheKey(key.to_string()))?;
    let timestamp = timestamp
        .parse()
        .map_err(|_| PriceCacheError::InvalidCacheKey(key.to_string()))?;
    Ok((from_asset.to_string(), timestamp))
}

/// An asset/timestamp pair identifying one historic price point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTimestamp {
    pub from_asset: String,
    pub timestamp: i64,
}

/// Parsed payload of a historic rates task.
///
/// Prices are keyed by asset symbol, then by timestamp; assets or
/// timestamps the backend could not price are simply absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricPrices {
    pub target_asset: String,
    pub assets: HashMap<String, HashMap<String, Decimal>>,
}

impl HistoricPrices {
    fn price(&self, from_asset: &str, timestamp: i64) -> Option<Decimal> {
        self.assets
            .get(from_asset)
            .and_then(|by_timestamp| by_timestamp.get(&timestamp.to_string()))
            .copied()
    }
}

/// Batch fetcher that resolves cache keys through one historic-rates task.
struct HistoricPriceFetcher {
    executor: Arc<dyn TaskExecutor>,
    notifier: Arc<dyn NotificationSink>,
    currency: watch::Receiver<String>,
}

#[async_trait]
impl BatchFetcher<Decimal> for HistoricPriceFetcher {
    async fn fetch(&self, keys: Vec<CacheKey>) -> Result<Vec<FetchedItem<Decimal>>> {
        let assets_timestamp = keys
            .iter()
            .map(|key| parse_key(key))
            .collect::<Result<Vec<_>>>()?;
        let target_asset = self.currency.borrow().clone();

        let task_id = self
            .executor
            .submit(TaskRequest::QueryHistoricalRates {
                assets_timestamp: assets_timestamp.clone(),
                target_asset: target_asset.clone(),
            })
            .await?;

        let meta = TaskMeta {
            title: TASK_TITLE.to_string(),
            description: format!(
                "Querying {} historic prices in {}",
                assets_timestamp.len(),
                target_asset
            ),
            ignore_result: false,
        };

        let prices = match self
            .executor
            .await_task(task_id, TaskType::FetchHistoricPrice, meta, true)
            .await
        {
            Ok(raw) => serde_json::from_value::<HistoricPrices>(raw)
                .map_err(|e| PriceCacheError::SchemaValidation(e.to_string()))?,
            // Cancellation is silent; every key resolves to "no value".
            Err(TaskError::Cancelled) => HistoricPrices::default(),
            Err(TaskError::Failed(message)) => {
                warn!("Historic price task failed: {message}");
                self.notifier.notify(Notification {
                    title: TASK_TITLE.to_string(),
                    message: format!("Failed to query historic prices: {message}"),
                });
                HistoricPrices::default()
            }
        };

        Ok(assets_timestamp
            .into_iter()
            .map(|(from_asset, timestamp)| FetchedItem {
                value: prices.price(&from_asset, timestamp),
                key: create_key(&from_asset, timestamp),
            })
            .collect())
    }
}

/// Per-subsystem cache of historic prices in the display currency.
///
/// Constructed once per logical domain and passed by reference to
/// consumers; there is no process-wide instance. Must be constructed
/// inside a tokio runtime: it spawns the currency watcher task.
pub struct HistoricPriceCache {
    cache: Arc<ItemCache<Decimal>>,
}

impl HistoricPriceCache {
    /// `currency` carries the display currency symbol; any change to it
    /// resets the whole cache, since every cached price is denominated in
    /// the currency that was current when it was fetched.
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn NotificationSink>,
        currency: watch::Receiver<String>,
    ) -> Self {
        let fetcher = Arc::new(HistoricPriceFetcher {
            executor,
            notifier,
            currency: currency.clone(),
        });
        let cache = Arc::new(ItemCache::new(fetcher));
        Self::spawn_currency_watcher(Arc::clone(&cache), currency);
        Self { cache }
    }

    fn spawn_currency_watcher(
        cache: Arc<ItemCache<Decimal>>,
        mut currency: watch::Receiver<String>,
    ) {
        tokio::spawn(async move {
            while currency.changed().await.is_ok() {
                debug!("Display currency changed, resetting historic price cache");
                cache.reset();
            }
        });
    }

    /// Reactive accessor: the price of `from_asset` at `timestamp` in the
    /// current display currency, or `None` (no price) while the value is
    /// pending, absent, or could not be determined.
    pub fn historic_price(&self, from_asset: &str, timestamp: i64) -> Option<Decimal> {
        self.cache.retrieve(&create_key(from_asset, timestamp))
    }

    pub fn retrieve(&self, key: &str) -> Option<Decimal> {
        self.cache.retrieve(key)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.cache.is_pending(key)
    }

    pub fn reset(&self) {
        self.cache.reset();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cache.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Fine-grained invalidation after edits that change the data specific
    /// price points depend on. Each pair is deleted individually; other
    /// entries stay resolved.
    pub fn reset_historical_prices_data(&self, items: &[AssetTimestamp]) {
        for item in items {
            self.cache
                .delete_cache_key(&create_key(&item.from_asset, item.timestamp));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::MockNotificationSink;
    use crate::task::MockTaskExecutor;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn setup() -> (
        HistoricPriceCache,
        Arc<MockTaskExecutor>,
        MockNotificationSink,
        watch::Sender<String>,
    ) {
        let executor = Arc::new(MockTaskExecutor::new());
        let notifier = MockNotificationSink::new();
        let (currency_tx, currency_rx) = watch::channel("USD".to_string());
        let cache = HistoricPriceCache::new(
            executor.clone(),
            Arc::new(notifier.clone()),
            currency_rx,
        );
        (cache, executor, notifier, currency_tx)
    }

    async fn settle(cache: &HistoricPriceCache, key: &str) {
        let mut rx = cache.subscribe();
        while cache.is_pending(key) {
            rx.changed().await.unwrap();
        }
    }

    #[test]
    fn test_key_round_trip() {
        let key = create_key("BTC", 1000);
        assert_eq!(key, "BTC#1000");
        assert_eq!(parse_key(&key).unwrap(), ("BTC".to_string(), 1000));
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        assert!(matches!(
            parse_key("BTC-1000"),
            Err(PriceCacheError::InvalidCacheKey(_))
        ));
        assert!(matches!(
            parse_key("BTC#not-a-timestamp"),
            Err(PriceCacheError::InvalidCacheKey(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_resolves_present_keys_and_marks_missing_ones() {
        let (cache, executor, notifier, _currency) = setup();
        executor.push_outcome(Ok(json!({
            "targetAsset": "USD",
            "assets": { "BTC": { "1000": "30000.5" } }
        })));

        assert_eq!(cache.historic_price("BTC", 1000), None);
        assert_eq!(cache.historic_price("ETH", 2000), None);
        settle(&cache, "BTC#1000").await;
        settle(&cache, "ETH#2000").await;

        assert_eq!(cache.retrieve("BTC#1000"), Some(dec!(30000.5)));
        // Omitted by the backend: explicit "no price", not stuck pending.
        assert_eq!(cache.retrieve("ETH#2000"), None);
        assert!(!cache.is_pending("ETH#2000"));
        assert!(notifier.is_empty());

        // One coalesced submission carrying both decoded pairs.
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0],
            TaskRequest::QueryHistoricalRates {
                assets_timestamp: vec![("BTC".to_string(), 1000), ("ETH".to_string(), 2000)],
                target_asset: "USD".to_string(),
            }
        );

        let awaited = executor.awaited();
        assert_eq!(awaited.len(), 1);
        assert_eq!(awaited[0].task_type, TaskType::FetchHistoricPrice);
        assert!(awaited[0].ignore_cache_on_duplicate);
        assert!(!awaited[0].meta.ignore_result);
    }

    #[tokio::test]
    async fn test_cancelled_task_is_silent_and_yields_no_price() {
        let (cache, executor, notifier, _currency) = setup();
        executor.push_outcome(Err(TaskError::Cancelled));

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;

        assert_eq!(cache.retrieve("BTC#1000"), None);
        assert!(!cache.is_pending("BTC#1000"));
        assert!(notifier.is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_notifies_once_and_yields_no_price() {
        let (cache, executor, notifier, _currency) = setup();
        executor.push_outcome(Err(TaskError::Failed("network error".to_string())));

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;

        assert_eq!(cache.retrieve("BTC#1000"), None);
        assert!(!cache.is_pending("BTC#1000"));

        let notifications = notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, TASK_TITLE);
        assert!(notifications[0].message.contains("network error"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_resets_keys_for_retry() {
        let (cache, executor, notifier, _currency) = setup();
        executor.push_outcome(Ok(json!({ "targetAsset": "USD", "assets": 5 })));
        executor.push_outcome(Ok(json!({
            "targetAsset": "USD",
            "assets": { "BTC": { "1000": "30000.5" } }
        })));

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;

        // Hard error: back to absent, no notification, retry allowed.
        assert_eq!(cache.stats().total(), 0);
        assert!(notifier.is_empty());

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;
        assert_eq!(cache.retrieve("BTC#1000"), Some(dec!(30000.5)));
        assert_eq!(executor.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_currency_change_resets_the_whole_cache() {
        let (cache, executor, _notifier, currency) = setup();
        executor.push_outcome(Ok(json!({
            "targetAsset": "USD",
            "assets": { "BTC": { "1000": "30000.5" } }
        })));
        executor.push_outcome(Ok(json!({
            "targetAsset": "EUR",
            "assets": { "BTC": { "1000": "27500" } }
        })));

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;
        assert_eq!(cache.retrieve("BTC#1000"), Some(dec!(30000.5)));

        let mut rx = cache.subscribe();
        currency.send("EUR".to_string()).unwrap();
        while cache.stats().total() != 0 {
            rx.changed().await.unwrap();
        }

        cache.historic_price("BTC", 1000);
        settle(&cache, "BTC#1000").await;
        assert_eq!(cache.retrieve("BTC#1000"), Some(dec!(27500)));

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1],
            TaskRequest::QueryHistoricalRates {
                assets_timestamp: vec![("BTC".to_string(), 1000)],
                target_asset: "EUR".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fine_grained_invalidation_deletes_only_listed_pairs() {
        let (cache, executor, _notifier, _currency) = setup();
        executor.push_outcome(Ok(json!({
            "targetAsset": "USD",
            "assets": {
                "BTC": { "1000": "30000.5" },
                "ETH": { "2000": "1800" }
            }
        })));

        cache.historic_price("BTC", 1000);
        cache.historic_price("ETH", 2000);
        settle(&cache, "BTC#1000").await;
        settle(&cache, "ETH#2000").await;

        cache.reset_historical_prices_data(&[AssetTimestamp {
            from_asset: "BTC".to_string(),
            timestamp: 1000,
        }]);

        assert_eq!(cache.stats().total(), 1);
        assert_eq!(cache.retrieve("ETH#2000"), Some(dec!(1800)));
        assert!(!cache.is_pending("ETH#2000"));
    }
}
