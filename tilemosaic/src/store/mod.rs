//! Tile ownership with an in-use map and a bounded LRU cache.
//!
//! The [`TileStore`] owns every [`TileRecord`]. A record lives in exactly one
//! of three places at any time:
//!
//! ```text
//!             acquire (hit)                 release (use_count → 0, has data)
//!   ┌──────────────────────────┐      ┌─────────────────────────────────────┐
//!   │                          ▼      │                                     ▼
//! (new) ──acquire──► ┌──────────────────┐                        ┌─────────────────┐
//!                    │   in-use map     │◄──acquire (revive)─────│   LRU cache     │
//!                    │  use_count > 0   │                        │ (moka, bounded) │
//!                    └────────┬─────────┘                        └────────┬────────┘
//!                             │ release (use_count → 0, no data)          │ evicted
//!                             ▼                                           ▼
//!                     abort + unload ─────────► (freed) ◄──────────── unload
//! ```
//!
//! Concurrent acquires of the same key share one load future, so a tile is
//! fetched once no matter how many renders are waiting for it.
//!
//! # Example
//!
//! ```ignore
//! use tilemosaic::store::TileStore;
//!
//! let store = TileStore::new(loader, 100, Duration::from_secs(60));
//! let record = store.acquire(&TileKey::new("streets", 5, 3, 3));
//! let data = record.loaded().await?;
//! store.release(&record);
//! ```

mod record;

pub use record::TileRecord;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{abortable, Aborted, FutureExt};
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::tile::{TileError, TileKey, TileLoader};
use record::{RecordState, TileLoad};

// =============================================================================
// Statistics
// =============================================================================

/// Lock-free counters updated by the store and its load futures.
#[derive(Debug, Default)]
struct StoreCounters {
    in_use_hits: AtomicU64,
    cache_revivals: AtomicU64,
    records_created: AtomicU64,
    fetches: AtomicU64,
    revalidations: AtomicU64,
    failed_loads: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of the store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Acquires served by a record already in use.
    pub in_use_hits: u64,
    /// Acquires served by reviving a cached record.
    pub cache_revivals: u64,
    /// Records created from scratch.
    pub records_created: u64,
    /// Calls to `TileLoader::fetch`.
    pub fetches: u64,
    /// Calls to `TileLoader::revalidate`.
    pub revalidations: u64,
    /// Loads that ended in an error (including timeouts).
    pub failed_loads: u64,
    /// Records evicted from the LRU cache.
    pub evictions: u64,
    /// Records currently in use.
    pub in_use: usize,
    /// Records currently cached.
    pub cached: usize,
}

// =============================================================================
// TileStore
// =============================================================================

/// Owner of all tile records.
///
/// All methods are synchronous and safe to call from any thread; the
/// in-use map lock serializes every ownership transition.
pub struct TileStore {
    loader: Arc<dyn TileLoader>,
    in_use: Mutex<HashMap<TileKey, Arc<TileRecord>>>,
    cache: Cache<TileKey, Arc<TileRecord>>,
    capacity: u64,
    load_timeout: Duration,
    counters: Arc<StoreCounters>,
}

impl TileStore {
    /// Create a store.
    ///
    /// # Arguments
    ///
    /// * `loader` - Collaborator that fetches and frees tile data
    /// * `capacity` - Maximum number of idle records kept in the LRU cache
    /// * `load_timeout` - Deadline for a single load attempt
    pub fn new(loader: Arc<dyn TileLoader>, capacity: u64, load_timeout: Duration) -> Self {
        let counters = Arc::new(StoreCounters::default());

        let evict_loader = Arc::clone(&loader);
        let evict_counters = Arc::clone(&counters);
        let cache = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                move |key: Arc<TileKey>, record: Arc<TileRecord>, cause: RemovalCause| {
                    // Explicit removals are revivals, not frees.
                    if cause.was_evicted() {
                        debug!(tile = %key, "Evicting cached tile");
                        evict_counters.evictions.fetch_add(1, Ordering::Relaxed);
                        evict_loader.unload(&record);
                    }
                },
            )
            .build();

        Self {
            loader,
            in_use: Mutex::new(HashMap::new()),
            cache,
            capacity,
            load_timeout,
            counters,
        }
    }

    /// Take a use of the tile, creating and loading it if needed.
    ///
    /// Every call must be paired with exactly one [`release`](Self::release).
    pub fn acquire(&self, key: &TileKey) -> Arc<TileRecord> {
        let mut in_use = self.in_use.lock();

        let record = if let Some(record) = in_use.get(key) {
            self.counters.in_use_hits.fetch_add(1, Ordering::Relaxed);
            Arc::clone(record)
        } else if let Some(record) = self.cache.remove(key) {
            self.cache.run_pending_tasks();
            self.counters.cache_revivals.fetch_add(1, Ordering::Relaxed);
            debug!(tile = %key, "Reviving cached tile");
            in_use.insert(key.clone(), Arc::clone(&record));
            record
        } else {
            self.counters.records_created.fetch_add(1, Ordering::Relaxed);
            let record = Arc::new(TileRecord::new(key.clone()));
            in_use.insert(key.clone(), Arc::clone(&record));
            record
        };

        let mut state = record.state.lock();
        state.use_count += 1;
        if state.load.is_none() {
            self.start_load(&record, &mut state);
        }
        drop(state);

        record
    }

    /// Take another use of a record that is already in use.
    ///
    /// Unlike [`acquire`](Self::acquire) this never starts a load, so a
    /// record whose load already failed stays failed. A record with no
    /// outstanding uses falls back to `acquire`.
    pub fn retain(&self, record: &Arc<TileRecord>) -> Arc<TileRecord> {
        {
            let _in_use = self.in_use.lock();
            let mut state = record.state.lock();
            if state.use_count > 0 {
                state.use_count += 1;
                self.counters.in_use_hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(record);
            }
        }
        warn!(tile = %record.key(), "Retain of idle tile, acquiring instead");
        self.acquire(record.key())
    }

    /// Give back one use of the tile.
    ///
    /// At zero uses the record moves into the LRU cache when it holds data;
    /// otherwise its pending load is aborted and the record is unloaded.
    /// Releasing a record that has no outstanding uses is logged and ignored.
    pub fn release(&self, record: &Arc<TileRecord>) {
        let mut in_use = self.in_use.lock();
        let mut state = record.state.lock();

        if state.use_count == 0 {
            warn!(tile = %record.key(), "Release of tile with no outstanding uses ignored");
            return;
        }
        state.use_count -= 1;
        if state.use_count > 0 {
            return;
        }

        if in_use
            .get(record.key())
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            in_use.remove(record.key());
        }

        if state.data.is_some() {
            drop(state);
            debug!(tile = %record.key(), "Caching idle tile");
            self.cache.insert(record.key().clone(), Arc::clone(record));
            self.cache.run_pending_tasks();
        } else {
            let pending = state.load.take().filter(TileLoad::is_pending);
            drop(state);
            if let Some(load) = pending {
                debug!(tile = %record.key(), "Aborting unneeded tile load");
                load.abort.abort();
                self.loader.abort(record.key());
            }
            self.loader.unload(record);
        }
    }

    /// Drop the stored load of every record, keeping decoded data.
    ///
    /// The next acquire of each tile starts a fresh load (a revalidation
    /// when data is present).
    pub fn invalidate(&self) {
        let in_use = self.in_use.lock();
        let mut invalidated = 0usize;

        let cached = self.cache.iter().map(|(_, record)| record);
        for record in in_use.values().cloned().chain(cached) {
            if let Some(load) = record.clear_load() {
                load.abort.abort();
                self.loader.abort(record.key());
            }
            invalidated += 1;
        }

        debug!(records = invalidated, "Invalidated tile loads");
    }

    /// Number of records currently in use.
    pub fn in_use_count(&self) -> usize {
        self.in_use.lock().len()
    }

    /// Number of records currently cached.
    pub fn cached_count(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    /// Whether the tile is in the in-use map.
    pub fn is_in_use(&self, key: &TileKey) -> bool {
        self.in_use.lock().contains_key(key)
    }

    /// Whether the tile is in the LRU cache.
    pub fn is_cached(&self, key: &TileKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Maximum number of cached records.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Deadline applied to each load.
    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    /// Take a snapshot of the statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            in_use_hits: self.counters.in_use_hits.load(Ordering::Relaxed),
            cache_revivals: self.counters.cache_revivals.load(Ordering::Relaxed),
            records_created: self.counters.records_created.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            revalidations: self.counters.revalidations.load(Ordering::Relaxed),
            failed_loads: self.counters.failed_loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            in_use: self.in_use_count(),
            cached: self.cached_count(),
        }
    }

    /// Start a load for the record. Caller holds the record lock.
    fn start_load(&self, record: &Arc<TileRecord>, state: &mut RecordState) {
        state.generation += 1;
        let generation = state.generation;
        let key = record.key().clone();

        let source = match &state.data {
            Some(data) => {
                self.counters.revalidations.fetch_add(1, Ordering::Relaxed);
                debug!(tile = %key, "Revalidating tile");
                self.loader.revalidate(&key, data.clone())
            }
            None => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                debug!(tile = %key, "Fetching tile");
                self.loader.fetch(&key)
            }
        };
        let (source, abort) = abortable(source);

        let loader = Arc::clone(&self.loader);
        let counters = Arc::clone(&self.counters);
        let weak = Arc::downgrade(record);
        let timeout = self.load_timeout;

        let future = async move {
            let outcome = match tokio::time::timeout(timeout, source).await {
                Ok(Ok(Ok(data))) => Ok(data),
                Ok(Ok(Err(e))) => Err(TileError::from_fetch(&key, e)),
                Ok(Err(Aborted)) => Err(TileError::Aborted { key: key.clone() }),
                Err(_) => {
                    loader.abort(&key);
                    Err(TileError::Timeout {
                        key: key.clone(),
                        after: timeout,
                    })
                }
            };

            if let Err(e) = &outcome {
                counters.failed_loads.fetch_add(1, Ordering::Relaxed);
                warn!(tile = %key, error = %e, "Tile load failed");
            }
            if let Some(record) = weak.upgrade() {
                record.settle_load(generation, &outcome);
            }
            outcome
        }
        .boxed()
        .shared();

        state.load = Some(TileLoad { future, abort });
    }
}
