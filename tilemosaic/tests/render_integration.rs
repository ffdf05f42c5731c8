//! Integration tests for the assembled mosaic engine.
//!
//! These tests drive `MosaicService` end to end with scripted collaborators:
//! - Request coalescing and shared tile loads
//! - Load timeouts, partial and total tile failure
//! - Block stitching onto a real pixmap destination
//! - Cancellation and epoch-guarded configuration changes
//!
//! Run with: `cargo test --test render_integration`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tiny_skia::{Color, Paint, Rect, Transform};
use tokio::sync::{oneshot, watch};

use tilemosaic::compositor::{PixmapDestination, Renderer, Surface, TileProjection};
use tilemosaic::render::RenderError;
use tilemosaic::request::{DrawSpec, TileSpec};
use tilemosaic::scene::{Scene, SceneEvent, Stylesheet};
use tilemosaic::store::TileRecord;
use tilemosaic::tile::{BoxFuture, FetchError, TileData, TileError, TileKey, TileLoader};
use tilemosaic::{MosaicConfig, MosaicService};

// ============================================================================
// Helper Types
// ============================================================================

/// Loader scripted per key; successful fetches wait for the release signal.
struct ScriptedLoader {
    fetches: Mutex<HashMap<TileKey, usize>>,
    failing: Mutex<HashSet<TileKey>>,
    hanging: Mutex<HashSet<TileKey>>,
    released: watch::Sender<bool>,
}

impl ScriptedLoader {
    fn new(released: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(released);
        Arc::new(Self {
            fetches: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            released: tx,
        })
    }

    fn release_fetches(&self) {
        self.released.send_replace(true);
    }

    fn fetch_count(&self, key: &TileKey) -> usize {
        self.fetches.lock().get(key).copied().unwrap_or(0)
    }
}

impl TileLoader for ScriptedLoader {
    fn fetch(&self, key: &TileKey) -> BoxFuture<'static, Result<TileData, FetchError>> {
        *self.fetches.lock().entry(key.clone()).or_default() += 1;

        if self.failing.lock().contains(key) {
            return Box::pin(futures::future::ready(Err(FetchError::new("HTTP 404"))));
        }
        if self.hanging.lock().contains(key) {
            return Box::pin(futures::future::pending());
        }

        let data = tile_color(key);
        let mut released = self.released.subscribe();
        Box::pin(async move {
            let _ = released.wait_for(|r| *r).await;
            Ok(data)
        })
    }

    fn abort(&self, _key: &TileKey) {}

    fn unload(&self, _record: &TileRecord) {}
}

/// Paints each tile's footprint with the opaque color in its data.
struct SolidRenderer;

impl Renderer for SolidRenderer {
    fn paint(&self, _scene: &Scene, tiles: &[TileProjection], surface: &mut Surface) {
        let block = surface.size() as f32;
        for tile in tiles {
            let b = tile.data.bytes();
            let edge = tile.transform.scale * block;
            if let Some(rect) =
                Rect::from_xywh(tile.transform.translate_x, tile.transform.translate_y, edge, edge)
            {
                let mut paint = Paint::default();
                paint.set_color(Color::from_rgba8(b[0], b[1], b[2], 255));
                paint.anti_alias = false;
                surface
                    .pixmap_mut()
                    .fill_rect(rect, &paint, Transform::identity(), None);
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Distinct opaque color per tile column/row.
fn tile_color(key: &TileKey) -> TileData {
    TileData::from(vec![
        40 + key.x as u8 * 50,
        40 + key.y as u8 * 50,
        200,
        255,
    ])
}

fn key(x: u32, y: u32) -> TileKey {
    TileKey::new("s1", 5, x, y)
}

fn service(loader: Arc<ScriptedLoader>, block_size: u32) -> MosaicService {
    MosaicService::new(
        MosaicConfig::default().with_block_size(block_size),
        loader,
        Box::new(SolidRenderer),
    )
    .expect("valid config")
}

fn stylesheet() -> Stylesheet {
    Stylesheet::from_value(json!({
        "sources": {"s1": {"type": "vector"}},
        "layers": [
            {"id": "land", "type": "fill", "source": "s1"},
            {"id": "roads", "type": "line", "source": "s1", "minzoom": 8}
        ]
    }))
    .expect("valid stylesheet")
}

fn callback() -> (
    impl FnOnce(Result<(), RenderError>) + Send + 'static,
    oneshot::Receiver<Result<(), RenderError>>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |outcome| {
            let _ = tx.send(outcome);
        },
        rx,
    )
}

/// RGB of a destination pixel, or `None` when transparent.
fn rgb(dest: &PixmapDestination, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    let p = dest.pixel(x, y)?;
    (p.alpha() != 0).then(|| (p.red(), p.green(), p.blue()))
}

fn expected_rgb(key: &TileKey) -> (u8, u8, u8) {
    let b = tile_color(key);
    let b = b.bytes();
    (b[0], b[1], b[2])
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Two identical requests before the tile arrives share one fetch and one render.
#[tokio::test]
async fn test_identical_requests_share_fetch_and_render() {
    let loader = ScriptedLoader::new(false);
    let service = service(loader.clone(), 256);
    let dest = Arc::new(PixmapDestination::new(256, 256).unwrap());
    let tiles = [TileSpec::new(TileKey::new("s1", 5, 3, 3), 0, 0, 256)];
    let draw = [DrawSpec::new(0, 0, 256, 256, 0, 0)];

    let (cb_a, rx_a) = callback();
    let (cb_b, rx_b) = callback();
    let a = service.render_tiles(dest.clone(), &draw, &tiles, cb_a);
    let b = service.render_tiles(dest.clone(), &draw, &tiles, cb_b);
    assert_eq!(a.render_id(), b.render_id());

    loader.release_fetches();
    assert_eq!(rx_a.await.unwrap(), Ok(()));
    assert_eq!(rx_b.await.unwrap(), Ok(()));
    assert_eq!(loader.fetch_count(&TileKey::new("s1", 5, 3, 3)), 1);
    assert_eq!(rgb(&dest, 128, 128), Some(expected_rgb(&TileKey::new("s1", 5, 3, 3))));

    let stats = service.stats();
    assert_eq!(stats.render.coalesced_requests, 1);
    assert_eq!(stats.render.coalescing_ratio(), 0.5);

    service.release_render(a);
    service.release_render(b);
    assert_eq!(service.store().in_use_count(), 0);
    assert_eq!(service.store().cached_count(), 1);
}

/// A fetch that never answers times out after 60 s and is fetched afresh later.
#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_reports_tile_timeout() {
    let loader = ScriptedLoader::new(true);
    let slow = TileKey::new("s1", 5, 3, 3);
    loader.hanging.lock().insert(slow.clone());
    let service = service(loader.clone(), 256);
    let dest = Arc::new(PixmapDestination::new(256, 256).unwrap());

    let (cb, rx) = callback();
    let render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(0, 0, 256, 256, 0, 0)],
        &[TileSpec::new(slow.clone(), 0, 0, 256)],
        cb,
    );

    match rx.await.unwrap() {
        Err(RenderError::Tile(TileError::Timeout { key, after })) => {
            assert_eq!(key, slow);
            assert_eq!(after, Duration::from_millis(60_000));
        }
        other => panic!("expected tile timeout, got {:?}", other),
    }

    service.release_render(render);
    assert!(!service.store().is_in_use(&slow));

    loader.hanging.lock().clear();
    let record = service.store().acquire(&slow);
    assert!(record.loaded().await.is_ok());
    assert_eq!(loader.fetch_count(&slow), 2);
    service.store().release(&record);
}

/// One failing tile out of three still composites the others.
#[tokio::test]
async fn test_partial_failure_leaves_failed_footprint_untouched() {
    let loader = ScriptedLoader::new(true);
    loader.failing.lock().insert(key(1, 0));
    let service = service(loader.clone(), 256);
    let dest = Arc::new(PixmapDestination::new(192, 64).unwrap());
    dest.with_pixmap(|p| p.fill(Color::BLACK));
    let tiles = [
        TileSpec::new(key(0, 0), 0, 0, 64),
        TileSpec::new(key(1, 0), 64, 0, 64),
        TileSpec::new(key(2, 0), 128, 0, 64),
    ];

    let (cb, rx) = callback();
    let _render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(0, 0, 192, 64, 0, 0)],
        &tiles,
        cb,
    );

    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "1 of 3 tiles not available");
    assert_eq!(rgb(&dest, 32, 32), Some(expected_rgb(&key(0, 0))));
    assert_eq!(rgb(&dest, 96, 32), Some((0, 0, 0)));
    assert_eq!(rgb(&dest, 160, 32), Some(expected_rgb(&key(2, 0))));
    assert_eq!(service.stats().render.partial_failures, 1);
}

/// When every tile fails the destination rectangle is cleared.
#[tokio::test]
async fn test_total_failure_clears_destination() {
    let loader = ScriptedLoader::new(true);
    loader.failing.lock().insert(key(0, 0));
    loader.failing.lock().insert(key(1, 0));
    let service = service(loader.clone(), 256);
    let dest = Arc::new(PixmapDestination::new(128, 64).unwrap());
    dest.with_pixmap(|p| p.fill(Color::BLACK));

    let (cb, rx) = callback();
    let _render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(0, 0, 64, 64, 0, 0)],
        &[
            TileSpec::new(key(0, 0), 0, 0, 64),
            TileSpec::new(key(1, 0), 64, 0, 64),
        ],
        cb,
    );

    assert_eq!(
        rx.await.unwrap(),
        Err(RenderError::AllTilesUnavailable { total: 2 })
    );
    assert_eq!(rgb(&dest, 10, 10), None);
    assert_eq!(rgb(&dest, 100, 10), Some((0, 0, 0)));
}

/// A request larger than the working surface is stitched from blocks.
#[tokio::test]
async fn test_large_request_stitched_across_blocks() {
    let loader = ScriptedLoader::new(true);
    let service = service(loader.clone(), 64);
    let dest = Arc::new(PixmapDestination::new(120, 120).unwrap());
    let tiles = [
        TileSpec::new(key(0, 0), 0, 0, 64),
        TileSpec::new(key(1, 0), 64, 0, 64),
        TileSpec::new(key(0, 1), 0, 64, 64),
        TileSpec::new(key(1, 1), 64, 64, 64),
    ];
    let (src_left, src_top, size, dest_left, dest_top) = (10i32, 10i32, 100u32, 5i32, 5i32);

    let (cb, rx) = callback();
    let _render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(src_left, src_top, size, size, dest_left, dest_top)],
        &tiles,
        cb,
    );
    assert_eq!(rx.await.unwrap(), Ok(()));

    for y in 0..120u32 {
        for x in 0..120u32 {
            let inside = (5..105).contains(&x) && (5..105).contains(&y);
            let actual = rgb(&dest, x, y);
            if inside {
                let plane_x = x as i32 - dest_left + src_left;
                let plane_y = y as i32 - dest_top + src_top;
                let tile = key((plane_x / 64) as u32, (plane_y / 64) as u32);
                assert_eq!(actual, Some(expected_rgb(&tile)), "pixel ({}, {})", x, y);
            } else {
                assert_eq!(actual, None, "pixel ({}, {}) outside rectangle", x, y);
            }
        }
    }
    assert_eq!(service.stats().compositor.blocks_painted, 4);
}

/// Releasing the only consumer before the tiles arrive abandons the render.
#[tokio::test]
async fn test_release_before_load_suppresses_completion() {
    let loader = ScriptedLoader::new(false);
    let service = service(loader.clone(), 256);
    let dest = Arc::new(PixmapDestination::new(64, 64).unwrap());
    let calls = Arc::new(Mutex::new(Vec::new()));

    let log = calls.clone();
    let render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(0, 0, 64, 64, 0, 0)],
        &[TileSpec::new(key(0, 0), 0, 0, 64)],
        move |outcome| log.lock().push(outcome),
    );
    service.release_render(render);

    loader.release_fetches();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*calls.lock(), vec![Err(RenderError::FullyCanceled)]);
    assert_eq!(rgb(&dest, 10, 10), None);
    assert_eq!(service.store().in_use_count(), 0);
}

/// Back-to-back changes before load: the first is superseded, the second applies both.
#[tokio::test]
async fn test_back_to_back_config_changes() {
    let loader = ScriptedLoader::new(true);
    let service = service(loader, 256);
    let mut events = service.subscribe();

    let a = service.set_layer_visibility("roads", false);
    let b = service.set_zoom_filter(5.0);

    service.load_stylesheet(&stylesheet());
    assert!(!a.await);
    assert!(b.await);

    assert_eq!(service.layers_visible(None, None), vec!["land"]);
    assert_eq!(service.visible_sources(None), vec!["s1"]);
    assert_eq!(events.recv().await.unwrap(), SceneEvent::Loaded);
    assert_eq!(
        events.recv().await.unwrap(),
        SceneEvent::ConfigChanged { epoch: 2 }
    );
}

/// A configuration change cancels renders that are still loading.
#[tokio::test]
async fn test_config_change_cancels_pending_renders() {
    let loader = ScriptedLoader::new(false);
    let service = service(loader.clone(), 256);
    service.load_stylesheet(&stylesheet());
    let dest = Arc::new(PixmapDestination::new(64, 64).unwrap());

    let (cb, rx) = callback();
    let render = service.render_tiles(
        dest.clone(),
        &[DrawSpec::new(0, 0, 64, 64, 0, 0)],
        &[TileSpec::new(key(0, 0), 0, 0, 64)],
        cb,
    );

    assert!(service
        .set_filter("land", Some(json!(["==", "class", "park"])))
        .await);
    assert_eq!(rx.await.unwrap(), Err(RenderError::Canceled));
    assert_eq!(service.coordinator().pending_count(), 0);

    loader.release_fetches();
    drop(render);
    assert_eq!(service.store().in_use_count(), 0);
}
