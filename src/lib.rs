//! Historic Price Cache Crate
//!
//! This crate provides on-demand, deduplicated retrieval of externally
//! computed values keyed by an identifier, built for historic asset prices
//! resolved by a remote worker behind a background task subsystem.
//!
//! # Overview
//!
//! Many independent call sites may request the same or overlapping price
//! points concurrently. The cache guarantees at most one in-flight fetch
//! per not-yet-cached key set:
//!
//! ```text
//! +------------------+     +------------------+
//! |    Consumers     | --> |   ItemCache<V>   |  (absent/pending/resolved)
//! +------------------+     +------------------+
//!                                   |  coalesced key batch
//!                                   v
//!                          +------------------+
//!                          |  BatchFetcher    |  (domain adapter)
//!                          +------------------+
//!                                   |  one task per batch
//!                                   v
//!                          +------------------+
//!                          |  TaskExecutor    |  (external subsystem)
//!                          +------------------+
//! ```
//!
//! All synchronous admissions within one scheduler tick map to a single
//! fetch. Task cancellation is silent; genuine task failures surface
//! exactly one [`Notification`] and still resolve the batch, so no key is
//! ever left permanently pending.
//!
//! # Core Types
//!
//! - [`ItemCache`] - Generic keyed async cache with batch coalescing
//! - [`BatchFetcher`] - Turns a batch of cache keys into values
//! - [`HistoricPriceCache`] - Historic price service over the cache
//! - [`TaskExecutor`] - Contract of the external task subsystem
//! - [`NotificationSink`] - Best-effort failure notification channel
//!
//! # Type Aliases
//!
//! - [`CacheKey`] - Deterministic key string (e.g. `"BTC#1000"`)

pub mod cache;
pub mod errors;
pub mod historic;
pub mod notifications;
pub mod task;

// Re-export cache engine types
pub use cache::{BatchFetcher, CacheEntry, CacheKey, CacheStats, FetchedItem, ItemCache};

// Re-export error types
pub use errors::{PriceCacheError, Result};

// Re-export historic price service types
pub use historic::{
    create_key, parse_key, AssetTimestamp, HistoricPriceCache, HistoricPrices,
};

// Re-export notification types
pub use notifications::{
    MockNotificationSink, NoOpNotificationSink, Notification, NotificationSink,
};

// Re-export task types
pub use task::{
    AwaitedTask, MockTaskExecutor, Task, TaskError, TaskExecutor, TaskId, TaskMeta, TaskRequest,
    TaskType,
};
