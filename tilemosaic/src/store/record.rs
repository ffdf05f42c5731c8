//! Tile records and their shared load futures.

use std::fmt;
use std::time::Instant;

use futures::future::{AbortHandle, FutureExt, Shared};
use parking_lot::Mutex;

use crate::tile::{BoxFuture, TileData, TileError, TileKey};

/// A load future shared by every user of the same record.
pub(crate) type SharedLoad = Shared<BoxFuture<'static, Result<TileData, TileError>>>;

/// One load attempt for a record.
pub(crate) struct TileLoad {
    pub(crate) future: SharedLoad,
    pub(crate) abort: AbortHandle,
}

impl TileLoad {
    /// Returns true while the load has not produced a result.
    pub(crate) fn is_pending(&self) -> bool {
        self.future.peek().is_none()
    }
}

/// Mutable part of a record, guarded by the record's mutex.
pub(crate) struct RecordState {
    pub(crate) use_count: usize,
    pub(crate) data: Option<TileData>,
    pub(crate) load: Option<TileLoad>,
    /// Bumped for every new load and every invalidation so a stale
    /// completion never overwrites a newer one.
    pub(crate) generation: u64,
}

/// A tile owned by the [`TileStore`](super::TileStore).
///
/// Records are shared as `Arc<TileRecord>` between the store and every
/// render that uses them. The use count is only changed by
/// [`TileStore::acquire`](super::TileStore::acquire) and
/// [`TileStore::release`](super::TileStore::release).
pub struct TileRecord {
    key: TileKey,
    created_at: Instant,
    pub(crate) state: Mutex<RecordState>,
}

impl TileRecord {
    pub(crate) fn new(key: TileKey) -> Self {
        Self {
            key,
            created_at: Instant::now(),
            state: Mutex::new(RecordState {
                use_count: 0,
                data: None,
                load: None,
                generation: 0,
            }),
        }
    }

    /// The tile this record holds.
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// When the record was first created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current number of outstanding acquisitions.
    pub fn use_count(&self) -> usize {
        self.state.lock().use_count
    }

    /// Whether the record holds usable data.
    pub fn has_data(&self) -> bool {
        self.state.lock().data.is_some()
    }

    /// The loaded data, if any.
    pub fn data(&self) -> Option<TileData> {
        self.state.lock().data.clone()
    }

    /// Whether a load future is currently stored (pending or settled).
    pub fn has_load(&self) -> bool {
        self.state.lock().load.is_some()
    }

    /// Future resolving once the tile is available.
    ///
    /// Shares the stored load when there is one. Without a stored load the
    /// future resolves immediately from the record's data, or with
    /// [`TileError::NotLoaded`].
    pub fn loaded(&self) -> BoxFuture<'static, Result<TileData, TileError>> {
        let state = self.state.lock();
        match (&state.load, &state.data) {
            (Some(load), _) => load.future.clone().boxed(),
            (None, Some(data)) => futures::future::ready(Ok(data.clone())).boxed(),
            (None, None) => futures::future::ready(Err(TileError::NotLoaded {
                key: self.key.clone(),
            }))
            .boxed(),
        }
    }

    /// Record the outcome of the load started under `generation`.
    ///
    /// Failures drop the stored future so the next acquire starts over.
    pub(crate) fn settle_load(&self, generation: u64, outcome: &Result<TileData, TileError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        match outcome {
            Ok(data) => state.data = Some(data.clone()),
            Err(_) => state.load = None,
        }
    }

    /// Forget the stored load. Decoded data is kept.
    ///
    /// Returns the dropped load when it was still pending so the caller can
    /// abort it.
    pub(crate) fn clear_load(&self) -> Option<TileLoad> {
        let mut state = self.state.lock();
        state.generation += 1;
        state.load.take().filter(TileLoad::is_pending)
    }
}

impl fmt::Debug for TileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TileRecord")
            .field("key", &self.key)
            .field("use_count", &state.use_count)
            .field("has_data", &state.data.is_some())
            .field("loading", &state.load.is_some())
            .finish()
    }
}
