//! Owning render handles.

use std::sync::{Arc, Weak};

use super::consumer::Consumer;
use super::coordinator::CoordinatorInner;
use super::RenderError;
use crate::request::Fingerprint;
use crate::store::{TileRecord, TileStore};

/// Handle returned by [`RenderCoordinator::render_tiles`](super::RenderCoordinator::render_tiles).
///
/// Holds one use of every tile in the render. Releasing the handle (or
/// dropping it) gives the uses back and, if the render has not finished,
/// cancels this consumer. Once release returns, the consumer receives no
/// further callbacks or blits.
pub struct RenderRef {
    render_id: u64,
    fingerprint: Fingerprint,
    consumer: Arc<Consumer>,
    tiles: Vec<Arc<TileRecord>>,
    store: Arc<TileStore>,
    coordinator: Weak<CoordinatorInner>,
    released: bool,
}

impl RenderRef {
    pub(crate) fn new(
        render_id: u64,
        fingerprint: Fingerprint,
        consumer: Arc<Consumer>,
        tiles: Vec<Arc<TileRecord>>,
        store: Arc<TileStore>,
        coordinator: Weak<CoordinatorInner>,
    ) -> Self {
        Self {
            render_id,
            fingerprint,
            consumer,
            tiles,
            store,
            coordinator,
            released: false,
        }
    }

    /// Id of the render this handle joined; shared by coalesced handles.
    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Tile records this handle holds a use of.
    pub fn tiles(&self) -> &[Arc<TileRecord>] {
        &self.tiles
    }

    /// Whether this consumer's callback already fired.
    pub fn is_done(&self) -> bool {
        self.consumer.has_fired()
    }

    /// Detach the consumer and give back the tile uses.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Detach first: while a consumer is attached its uses keep every
        // tile of the render in use for joiners.
        match self.coordinator.upgrade() {
            Some(coordinator) => {
                coordinator.release_consumer(&self.fingerprint, self.render_id, &self.consumer)
            }
            None => {
                self.consumer.notify(Err(RenderError::Canceled));
            }
        }

        for record in &self.tiles {
            self.store.release(record);
        }
    }
}

impl Drop for RenderRef {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for RenderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderRef")
            .field("render_id", &self.render_id)
            .field("consumer", &self.consumer.id())
            .field("tiles", &self.tiles.len())
            .field("released", &self.released)
            .finish()
    }
}
