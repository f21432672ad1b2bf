//! Generic keyed async cache with batch coalescing.

mod item_cache;

pub use item_cache::{BatchFetcher, CacheEntry, CacheKey, CacheStats, FetchedItem, ItemCache};
