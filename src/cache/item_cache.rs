//! Keyed async cache engine.
//!
//! Tracks per key one of absent, pending, or resolved; coalesces all key
//! admissions within one scheduler tick into a single [`BatchFetcher`]
//! call, so logically-concurrent readers observe one fetch for the
//! deduplicated union of their keys.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error};
use tokio::sync::watch;

use crate::errors::Result;

/// Deterministic string encoding of a domain lookup identifier.
pub type CacheKey = String;

/// State of a single cache entry.
///
/// Absence from the entry table means the key was never requested or was
/// invalidated since.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheEntry<V> {
    /// Admitted into an in-flight fetch; value not yet known.
    Pending,
    /// Fetch completed. `None` means the backend had no value for this key,
    /// which is distinct from "not yet known".
    Resolved(Option<V>),
}

/// One element of a fetch result: a requested key and the value the backend
/// returned for it, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedItem<V> {
    pub key: CacheKey,
    pub value: Option<V>,
}

/// Turns a batch of cache keys into values.
///
/// Implementations yield one item per requested key, in request order, and
/// are invoked at most once per coalescing window. Expected backend
/// outcomes (cancellation, reported failures) must be converted into `None`
/// values; an `Err` is reserved for hard errors and drops the affected keys
/// back to absent so the next access retries.
#[async_trait]
pub trait BatchFetcher<V>: Send + Sync {
    async fn fetch(&self, keys: Vec<CacheKey>) -> Result<Vec<FetchedItem<V>>>;
}

/// Entry counts by state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub resolved: usize,
    pub pending: usize,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.resolved + self.pending
    }
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    /// Keys admitted in the current coalescing window, in admission order.
    /// Duplicates cannot occur: a key is only admitted while absent, and
    /// admission marks it pending.
    batch: Vec<CacheKey>,
    /// Whether a flush task for the current batch is already spawned.
    flush_scheduled: bool,
    /// Bumped by `reset()`. A fetch drained under an older generation must
    /// not write results back.
    generation: u64,
}

/// Generic keyed async cache.
///
/// Reads never block and never fail: `retrieve` returns the resolved value
/// when known and `None` (the "no value" sentinel) while a key is pending,
/// absent, or resolved without a value. A first read of an absent key
/// admits it into the current batch as a side effect.
///
/// State changes are announced on a [`watch`] channel (see
/// [`subscribe`](Self::subscribe)); readers recompute from current state on
/// each notification rather than holding references into the entry table.
///
/// Must be used inside a tokio runtime: admissions spawn the flush task.
pub struct ItemCache<V> {
    state: Arc<Mutex<CacheState<V>>>,
    fetcher: Arc<dyn BatchFetcher<V>>,
    changed: Arc<watch::Sender<u64>>,
}

impl<V> ItemCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn BatchFetcher<V>>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                batch: Vec::new(),
                flush_scheduled: false,
                generation: 0,
            })),
            fetcher,
            changed: Arc::new(changed),
        }
    }

    /// Reactive read: resolved value, or the `None` sentinel.
    ///
    /// An absent key is marked pending and admitted into the next fetch
    /// batch; a pending key returns the sentinel without triggering a
    /// second fetch.
    pub fn retrieve(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().unwrap();
        match state.entries.get(key) {
            Some(CacheEntry::Resolved(value)) => value.clone(),
            Some(CacheEntry::Pending) => None,
            None => {
                state.entries.insert(key.to_string(), CacheEntry::Pending);
                state.batch.push(key.to_string());
                if !state.flush_scheduled {
                    state.flush_scheduled = true;
                    self.spawn_flush();
                }
                drop(state);
                self.notify_changed();
                None
            }
        }
    }

    /// Reactive read: whether the key is awaiting an in-flight fetch.
    /// Never admits the key.
    pub fn is_pending(&self, key: &str) -> bool {
        matches!(
            self.state.lock().unwrap().entries.get(key),
            Some(CacheEntry::Pending)
        )
    }

    /// Clears all entries and pending state.
    ///
    /// Called when the context cached values are relative to changes, since
    /// every entry is invalid under the new context. Safe while a fetch is
    /// in flight: the generation bump prevents its results from being
    /// written back.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.entries.clear();
            state.batch.clear();
            state.generation += 1;
        }
        self.notify_changed();
    }

    /// Removes a single entry, forcing a re-fetch on next access.
    /// All other entries are unaffected.
    pub fn delete_cache_key(&self, key: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            // A pending key may still be queued for the next flush; drop it
            // from the batch so a re-request in the same window cannot
            // enqueue it a second time.
            state.batch.retain(|queued| queued != key);
            state.entries.remove(key).is_some()
        };
        if removed {
            self.notify_changed();
        }
    }

    /// Change-notification channel. The payload is a bump counter; on each
    /// change, reread state through [`retrieve`](Self::retrieve) and
    /// [`is_pending`](Self::is_pending).
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        let pending = state
            .entries
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Pending))
            .count();
        CacheStats {
            resolved: state.entries.len() - pending,
            pending,
        }
    }

    fn notify_changed(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    fn spawn_flush(&self) {
        let state = Arc::clone(&self.state);
        let fetcher = Arc::clone(&self.fetcher);
        let changed = Arc::clone(&self.changed);
        tokio::spawn(async move {
            // Let every admission in the current scheduler tick join
            // the batch before draining it.
            tokio::task::yield_now().await;

            let (keys, generation) = {
                let mut state = state.lock().unwrap();
                state.flush_scheduled = false;
                (mem::take(&mut state.batch), state.generation)
            };
            if keys.is_empty() {
                return;
            }
            debug!("Fetching batch of {} cache keys", keys.len());

            match fetcher.fetch(keys.clone()).await {
                Ok(items) => {
                    let mut state = state.lock().unwrap();
                    if state.generation != generation {
                        debug!("Discarding fetch results from a stale generation");
                        return;
                    }
                    // Only keys still pending from this batch are written;
                    // keys the fetcher omitted stay pending until an
                    // explicit reset.
                    for item in items {
                        if let Some(entry) = state.entries.get_mut(&item.key) {
                            if matches!(entry, CacheEntry::Pending) {
                                *entry = CacheEntry::Resolved(item.value);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Batch fetch failed, affected keys will retry on next access: {e}");
                    let mut state = state.lock().unwrap();
                    if state.generation == generation {
                        for key in &keys {
                            if matches!(state.entries.get(key), Some(CacheEntry::Pending)) {
                                state.entries.remove(key);
                            }
                        }
                    }
                }
            }
            changed.send_modify(|version| *version += 1);
        });
    }
}
