//! Mock collaborators shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tiny_skia::{Color, Paint, Rect, Transform};
use tokio::sync::watch;

use crate::compositor::{
    BlockTransform, Compositor, DestRect, Destination, PixelRect, Renderer, Surface, TileProjection,
};
use crate::render::{OnDone, RenderCoordinator, RenderError};
use crate::scene::{Scene, SceneHandle, Stylesheet};
use crate::store::{TileRecord, TileStore};
use crate::tile::{BoxFuture, FetchError, TileData, TileKey, TileLoader};

/// RGBA payload the mock loader produces for a key.
pub(crate) fn color_for(key: &TileKey) -> TileData {
    TileData::from(vec![
        (key.x % 6 * 40) as u8,
        (key.y % 6 * 40) as u8,
        key.z.wrapping_mul(10),
        255,
    ])
}

// =============================================================================
// MockLoader
// =============================================================================

#[derive(Default)]
struct MockState {
    fetches: HashMap<TileKey, usize>,
    revalidations: HashMap<TileKey, usize>,
    failing: HashSet<TileKey>,
    hanging: HashSet<TileKey>,
    aborted: Vec<TileKey>,
    unloaded: Vec<TileKey>,
}

/// Loader whose behavior is scripted per key.
pub(crate) struct MockLoader {
    state: Mutex<MockState>,
    gate: Arc<watch::Sender<bool>>,
}

/// Holds successful fetches until opened.
pub(crate) struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub(crate) fn open(&self) {
        self.tx.send_replace(true);
    }
}

impl MockLoader {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            state: Mutex::new(MockState::default()),
            gate: Arc::new(tx),
        }
    }

    /// Close the gate; fetches stay pending until [`Gate::open`].
    pub(crate) fn gate(&self) -> Gate {
        self.gate.send_replace(false);
        Gate {
            tx: Arc::clone(&self.gate),
        }
    }

    pub(crate) fn fail(&self, key: TileKey) {
        self.state.lock().failing.insert(key);
    }

    pub(crate) fn hang(&self, key: TileKey) {
        self.state.lock().hanging.insert(key);
    }

    pub(crate) fn succeed(&self, key: TileKey) {
        let mut state = self.state.lock();
        state.failing.remove(&key);
        state.hanging.remove(&key);
    }

    pub(crate) fn fetch_count(&self, key: &TileKey) -> usize {
        self.state.lock().fetches.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn revalidation_count(&self, key: &TileKey) -> usize {
        self.state.lock().revalidations.get(key).copied().unwrap_or(0)
    }

    pub(crate) fn aborted(&self) -> Vec<TileKey> {
        self.state.lock().aborted.clone()
    }

    pub(crate) fn unloaded(&self) -> Vec<TileKey> {
        self.state.lock().unloaded.clone()
    }
}

impl TileLoader for MockLoader {
    fn fetch(&self, key: &TileKey) -> BoxFuture<'static, Result<TileData, FetchError>> {
        let mut state = self.state.lock();
        *state.fetches.entry(key.clone()).or_default() += 1;

        if state.failing.contains(key) {
            let err = FetchError::new(format!("no tile at {}", key));
            return Box::pin(async move { Err(err) });
        }
        if state.hanging.contains(key) {
            return Box::pin(futures::future::pending());
        }

        let data = color_for(key);
        let mut gate = self.gate.subscribe();
        Box::pin(async move {
            let _ = gate.wait_for(|open| *open).await;
            Ok(data)
        })
    }

    fn revalidate(
        &self,
        key: &TileKey,
        data: TileData,
    ) -> BoxFuture<'static, Result<TileData, FetchError>> {
        *self
            .state
            .lock()
            .revalidations
            .entry(key.clone())
            .or_default() += 1;
        Box::pin(async move { Ok(data) })
    }

    fn abort(&self, key: &TileKey) {
        self.state.lock().aborted.push(key.clone());
    }

    fn unload(&self, record: &TileRecord) {
        self.state.lock().unloaded.push(record.key().clone());
    }
}

// =============================================================================
// Renderer and destination
// =============================================================================

/// Fills each tile's footprint with the color carried in its data.
pub(crate) struct FillRenderer {
    calls: Arc<Mutex<Vec<Vec<BlockTransform>>>>,
}

impl FillRenderer {
    pub(crate) fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Transforms passed to each paint call.
    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<Vec<BlockTransform>>>> {
        Arc::clone(&self.calls)
    }
}

impl Renderer for FillRenderer {
    fn paint(&self, _scene: &Scene, tiles: &[TileProjection], surface: &mut Surface) {
        self.calls
            .lock()
            .push(tiles.iter().map(|t| t.transform).collect());

        let block = surface.size() as f32;
        for tile in tiles {
            let bytes = tile.data.bytes();
            if bytes.len() < 4 {
                continue;
            }
            let edge = tile.transform.scale * block;
            let Some(rect) =
                Rect::from_xywh(tile.transform.translate_x, tile.transform.translate_y, edge, edge)
            else {
                continue;
            };
            let mut paint = Paint::default();
            paint.set_color(Color::from_rgba8(bytes[0], bytes[1], bytes[2], bytes[3]));
            paint.anti_alias = false;
            surface
                .pixmap_mut()
                .fill_rect(rect, &paint, Transform::identity(), None);
        }
    }
}

/// Records every blit and clear.
#[derive(Default)]
pub(crate) struct RecordingDestination {
    blits: Mutex<Vec<(PixelRect, i32, i32)>>,
    clears: Mutex<Vec<DestRect>>,
}

impl RecordingDestination {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn blits(&self) -> Vec<(PixelRect, i32, i32)> {
        self.blits.lock().clone()
    }

    pub(crate) fn clears(&self) -> Vec<DestRect> {
        self.clears.lock().clone()
    }
}

impl Destination for RecordingDestination {
    fn blit(&self, _surface: &Surface, src: PixelRect, dest_left: i32, dest_top: i32) {
        self.blits.lock().push((src, dest_left, dest_top));
    }

    fn clear(&self, rect: DestRect) {
        self.clears.lock().push(rect);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Two sources, one layer each.
pub(crate) fn basic_stylesheet() -> Stylesheet {
    Stylesheet::from_value(json!({
        "sources": {"s1": {"type": "vector"}, "s2": {"type": "vector"}},
        "layers": [
            {"id": "background", "type": "background"},
            {"id": "water", "type": "fill", "source": "s1",
             "filter": ["==", "kind", "lake"], "paint": {"fill-color": "#00f"}},
            {"id": "roads", "type": "line", "source": "s2"}
        ]
    }))
    .expect("valid stylesheet")
}

/// Scene, store and coordinator over a [`MockLoader`] with 256px blocks.
pub(crate) fn coordinator_fixture() -> (
    SceneHandle,
    Arc<TileStore>,
    RenderCoordinator,
    Arc<MockLoader>,
) {
    let loader = Arc::new(MockLoader::new());
    let scene = SceneHandle::new();
    let store = Arc::new(TileStore::new(
        loader.clone(),
        10,
        Duration::from_secs(60),
    ));
    let compositor = Compositor::new(Box::new(FillRenderer::new()), 256);
    let coordinator = RenderCoordinator::new(Arc::clone(&store), compositor, scene.clone());
    (scene, store, coordinator, loader)
}

/// Ordered record of `(consumer tag, outcome)` pairs.
#[derive(Clone)]
pub(crate) struct OutcomeLog {
    entries: Arc<Mutex<Vec<(u64, Result<(), RenderError>)>>>,
    count: Arc<watch::Sender<usize>>,
}

impl OutcomeLog {
    pub(crate) fn outcomes(&self) -> Vec<(u64, Result<(), RenderError>)> {
        self.entries.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Wait until at least `n` outcomes were recorded.
    pub(crate) async fn wait_for(&self, n: usize) {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|c| *c >= n))
            .await
            .expect("timed out waiting for render outcomes")
            .expect("outcome log closed");
    }
}

/// A log plus a factory of callbacks that append to it under a tag.
pub(crate) fn outcome_log() -> (OutcomeLog, impl Fn(u64) -> OnDone) {
    let (tx, _) = watch::channel(0usize);
    let log = OutcomeLog {
        entries: Arc::new(Mutex::new(Vec::new())),
        count: Arc::new(tx),
    };
    let factory_log = log.clone();
    let factory = move |tag: u64| -> OnDone {
        let log = factory_log.clone();
        Box::new(move |outcome| {
            let len = {
                let mut entries = log.entries.lock();
                entries.push((tag, outcome));
                entries.len()
            };
            log.count.send_replace(len);
        })
    };
    (log, factory)
}
