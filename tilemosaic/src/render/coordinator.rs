//! The render coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consumer::{Consumer, OnDone};
use super::handle::RenderRef;
use super::types::{RenderCounters, RenderError, RenderPhase, RenderStats};
use crate::compositor::{CompositeTarget, Compositor, Destination};
use crate::request::{canonicalize, DrawSpec, Fingerprint, TileSpec};
use crate::scene::SceneHandle;
use crate::store::{TileRecord, TileStore};
use crate::tile::{TileData, TileError};

/// An in-flight render shared by every consumer with the same fingerprint.
struct PendingRender {
    render_id: u64,
    tiles: Vec<TileSpec>,
    /// Records backing `tiles`, in the same order.
    records: Vec<Arc<TileRecord>>,
    consumers: Vec<Arc<Consumer>>,
    phase: RenderPhase,
    cancel: CancellationToken,
}

#[derive(Default)]
struct CoordinatorState {
    pending: HashMap<Fingerprint, PendingRender>,
}

pub(crate) struct CoordinatorInner {
    store: Arc<TileStore>,
    compositor: Compositor,
    scene: SceneHandle,
    state: Mutex<CoordinatorState>,
    next_render_id: AtomicU64,
    next_consumer_id: AtomicU64,
    counters: RenderCounters,
}

/// Coalesces identical render requests and drives them to completion.
///
/// Lock order is coordinator state, then tile store, then scene. Consumer
/// callbacks always run with the coordinator state unlocked.
#[derive(Clone)]
pub struct RenderCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RenderCoordinator {
    pub fn new(store: Arc<TileStore>, compositor: Compositor, scene: SceneHandle) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                compositor,
                scene,
                state: Mutex::new(CoordinatorState::default()),
                next_render_id: AtomicU64::new(0),
                next_consumer_id: AtomicU64::new(0),
                counters: RenderCounters::default(),
            }),
        }
    }

    /// Render `tiles` and copy the `draw_specs` rectangles to `destination`.
    ///
    /// `on_done` fires exactly once: before this returns if the request is
    /// rejected (`Request`), when the render finishes, when the
    /// returned [`RenderRef`] is released first (`Canceled`, or
    /// `FullyCanceled` for the last consumer), or when
    /// [`cancel_all`](Self::cancel_all) runs. Must be called within a Tokio
    /// runtime.
    pub fn render_tiles<F>(
        &self,
        destination: Arc<dyn Destination>,
        draw_specs: &[DrawSpec],
        tiles: &[TileSpec],
        on_done: F,
    ) -> RenderRef
    where
        F: FnOnce(Result<(), RenderError>) + Send + 'static,
    {
        self.render_boxed(destination, draw_specs, tiles, Box::new(on_done))
    }

    fn render_boxed(
        &self,
        destination: Arc<dyn Destination>,
        draw_specs: &[DrawSpec],
        tiles: &[TileSpec],
        on_done: OnDone,
    ) -> RenderRef {
        let inner = &self.inner;
        RenderCounters::incr(&inner.counters.total_requests);

        let consumer_id = inner.next_consumer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let canonical = match canonicalize(tiles, draw_specs) {
            Ok(canonical) => canonical,
            Err(e) => {
                RenderCounters::incr(&inner.counters.rejected_requests);
                warn!(consumer = consumer_id, error = %e, "Rejected render request");
                let consumer = Arc::new(Consumer::new(
                    consumer_id,
                    destination,
                    draw_specs.to_vec(),
                    on_done,
                ));
                consumer.notify(Err(RenderError::Request(e)));
                return RenderRef::new(
                    0,
                    Fingerprint::default(),
                    consumer,
                    Vec::new(),
                    Arc::clone(&inner.store),
                    Arc::downgrade(inner),
                );
            }
        };
        let consumer = Arc::new(Consumer::new(
            consumer_id,
            destination,
            canonical.draw_specs,
            on_done,
        ));
        let fingerprint = canonical.fingerprint;

        let mut state = inner.state.lock();

        if let Some(pending) = state.pending.get_mut(&fingerprint) {
            RenderCounters::incr(&inner.counters.coalesced_requests);
            let records: Vec<_> = pending
                .records
                .iter()
                .map(|r| inner.store.retain(r))
                .collect();
            pending.consumers.push(Arc::clone(&consumer));
            debug!(
                render_id = pending.render_id,
                consumer = consumer_id,
                consumers = pending.consumers.len(),
                "Joined pending render"
            );
            return RenderRef::new(
                pending.render_id,
                fingerprint,
                consumer,
                records,
                Arc::clone(&inner.store),
                Arc::downgrade(inner),
            );
        }

        RenderCounters::incr(&inner.counters.new_renders);
        let render_id = inner.next_render_id.fetch_add(1, Ordering::Relaxed) + 1;
        let records = acquire_all(&inner.store, &canonical.tiles);
        let loads: Vec<_> = records.iter().map(|r| r.loaded()).collect();
        let cancel = CancellationToken::new();

        state.pending.insert(
            fingerprint.clone(),
            PendingRender {
                render_id,
                tiles: canonical.tiles,
                records: records.clone(),
                consumers: vec![Arc::clone(&consumer)],
                phase: RenderPhase::Loading,
                cancel: cancel.clone(),
            },
        );
        drop(state);

        debug!(
            render_id,
            consumer = consumer_id,
            tiles = records.len(),
            fingerprint = %fingerprint,
            "Started render"
        );

        let weak = Arc::downgrade(inner);
        let task_fingerprint = fingerprint.clone();
        tokio::spawn(async move {
            let outcomes = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(render_id, "Render load wait canceled");
                    return;
                }
                outcomes = join_all(loads) => outcomes,
            };
            if let Some(inner) = weak.upgrade() {
                inner.settle(&task_fingerprint, render_id, outcomes);
            }
        });

        RenderRef::new(
            render_id,
            fingerprint,
            consumer,
            records,
            Arc::clone(&inner.store),
            Arc::downgrade(inner),
        )
    }

    /// Release a render handle.
    ///
    /// Equivalent to [`RenderRef::release`].
    pub fn release_render(&self, render: RenderRef) {
        render.release();
    }

    /// Finish every pending render with `Canceled` and invalidate tile loads.
    pub fn cancel_all(&self) {
        self.cancel_all_then(|| ());
    }

    /// Cancel every pending render, then run `apply` before any new render
    /// can start or settle.
    ///
    /// `apply` runs with the coordinator state locked, so it may take the
    /// scene lock but must not call back into the coordinator. Consumers
    /// are notified after it returns.
    pub(crate) fn cancel_all_then<R>(&self, apply: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        let (drained, result) = {
            let mut state = inner.state.lock();
            let drained: Vec<PendingRender> = state
                .pending
                .drain()
                .map(|(_, mut pending)| {
                    pending.cancel.cancel();
                    pending.phase = RenderPhase::Canceled;
                    pending
                })
                .collect();
            inner.store.invalidate();
            (drained, apply())
        };

        if !drained.is_empty() {
            info!(renders = drained.len(), "Canceled all pending renders");
        }
        for pending in drained {
            RenderCounters::incr(&inner.counters.canceled);
            for consumer in pending.consumers {
                consumer.notify(Err(RenderError::Canceled));
            }
        }
        result
    }

    /// Number of renders in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Phase of the in-flight render for `fingerprint`.
    pub fn phase(&self, fingerprint: &Fingerprint) -> Option<RenderPhase> {
        self.inner
            .state
            .lock()
            .pending
            .get(fingerprint)
            .map(|p| p.phase)
    }

    pub fn store(&self) -> &Arc<TileStore> {
        &self.inner.store
    }

    pub fn scene(&self) -> &SceneHandle {
        &self.inner.scene
    }

    pub fn compositor(&self) -> &Compositor {
        &self.inner.compositor
    }

    pub fn stats(&self) -> RenderStats {
        self.inner.counters.snapshot(self.pending_count())
    }
}

impl std::fmt::Debug for RenderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCoordinator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn acquire_all(store: &TileStore, tiles: &[TileSpec]) -> Vec<Arc<TileRecord>> {
    tiles.iter().map(|t| store.acquire(&t.key)).collect()
}

impl CoordinatorInner {
    /// Composite a render whose loads settled and notify its consumers.
    fn settle(
        &self,
        fingerprint: &Fingerprint,
        render_id: u64,
        outcomes: Vec<Result<TileData, TileError>>,
    ) {
        let mut state = self.state.lock();
        match state.pending.get(fingerprint) {
            Some(pending) if pending.render_id == render_id => {}
            _ => {
                debug!(render_id, "Discarding stale render completion");
                return;
            }
        }
        let Some(mut pending) = state.pending.remove(fingerprint) else {
            return;
        };
        pending.phase = RenderPhase::Compositing;

        let total = pending.tiles.len();
        let mut available = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (spec, outcome) in pending.tiles.iter().zip(outcomes) {
            match outcome {
                Ok(data) => available.push((spec.clone(), data)),
                Err(e) => failures.push(e),
            }
        }

        let targets: Vec<CompositeTarget<'_>> =
            pending.consumers.iter().map(|c| c.target()).collect();

        let outcome = if total == 0 {
            self.compositor.clear(&targets);
            Ok(())
        } else if available.is_empty() {
            RenderCounters::incr(&self.counters.total_failures);
            self.compositor.clear(&targets);
            warn!(render_id, total, "No tiles available for render");
            match failures.pop() {
                Some(only) if total == 1 => Err(RenderError::Tile(only)),
                _ => Err(RenderError::AllTilesUnavailable { total }),
            }
        } else {
            let scene = self.scene.read();
            self.compositor.composite(&scene, &available, &targets);
            drop(scene);
            if failures.is_empty() {
                Ok(())
            } else {
                RenderCounters::incr(&self.counters.partial_failures);
                warn!(render_id, failed = failures.len(), total, "Render missing tiles");
                Err(RenderError::PartialTilesUnavailable {
                    failed: failures.len(),
                    total,
                })
            }
        };
        drop(targets);

        pending.phase = RenderPhase::Done;
        RenderCounters::incr(&self.counters.completed);
        drop(state);

        debug!(
            render_id,
            consumers = pending.consumers.len(),
            ok = outcome.is_ok(),
            "Render finished"
        );
        for consumer in pending.consumers {
            consumer.notify(outcome.clone());
        }
    }

    /// Detach a consumer. Its tile uses are released afterwards by the handle.
    pub(crate) fn release_consumer(
        &self,
        fingerprint: &Fingerprint,
        render_id: u64,
        consumer: &Arc<Consumer>,
    ) {
        let emptied = {
            let mut state = self.state.lock();
            match state.pending.get_mut(fingerprint) {
                Some(pending) if pending.render_id == render_id => {
                    pending.consumers.retain(|c| !Arc::ptr_eq(c, consumer));
                    if pending.consumers.is_empty() {
                        state.pending.remove(fingerprint)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        match emptied {
            Some(pending) => {
                pending.cancel.cancel();
                RenderCounters::incr(&self.counters.fully_canceled);
                debug!(render_id, "Render fully canceled");
                consumer.notify(Err(RenderError::FullyCanceled));
            }
            None => {
                consumer.notify(Err(RenderError::Canceled));
            }
        }
    }
}
