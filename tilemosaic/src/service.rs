//! The assembled engine.
//!
//! [`MosaicService`] wires the tile store, compositor, render coordinator,
//! scene and configuration guard together:
//!
//! ```text
//!                     ┌────────────────────┐
//!  render_tiles ────► │ RenderCoordinator  │ ──► Compositor ──► Renderer
//!                     └─────────┬──────────┘          │
//!                               │ acquire/release     └──► Destination
//!                               ▼
//!                     ┌────────────────────┐
//!                     │ TileStore          │ ──► TileLoader
//!                     └────────────────────┘
//!  set_* / stage ───► ConfigEpochGuard ──► cancel_all + Scene
//! ```
//!
//! # Example
//!
//! ```ignore
//! let service = MosaicService::new(MosaicConfig::default(), loader, renderer)?;
//! service.load_stylesheet(&Stylesheet::from_json(STYLE)?);
//!
//! let render = service.render_tiles(dest, &draw_specs, &tiles, |outcome| {
//!     if let Err(e) = outcome { tracing::warn!(error = %e, "render failed"); }
//! });
//! // ... later, when the pixels are no longer needed
//! service.release_render(render);
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::info;

use crate::compositor::{CompositorStats, Compositor, Destination, Renderer};
use crate::config::{ConfigError, MosaicConfig};
use crate::render::{RenderCoordinator, RenderError, RenderRef, RenderStats};
use crate::request::{DrawSpec, TileSpec};
use crate::scene::{
    ConfigEpochGuard, ConfigMutation, ConfigUpdate, SceneEvent, SceneHandle, StagedChange,
    Stylesheet,
};
use crate::store::{StoreStats, TileStore};
use crate::tile::TileLoader;

/// Statistics of every component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MosaicStats {
    pub store: StoreStats,
    pub render: RenderStats,
    pub compositor: CompositorStats,
    /// Latest committed configuration epoch.
    pub config_epoch: u64,
}

/// Entry point of the engine.
pub struct MosaicService {
    config: MosaicConfig,
    scene: SceneHandle,
    store: Arc<TileStore>,
    coordinator: RenderCoordinator,
    guard: ConfigEpochGuard,
}

impl MosaicService {
    /// Build the engine. The scene starts unloaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: MosaicConfig,
        loader: Arc<dyn TileLoader>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let scene = SceneHandle::new();
        let store = Arc::new(TileStore::new(
            loader,
            config.tile_cache_capacity,
            config.tile_load_timeout(),
        ));
        let compositor = Compositor::new(renderer, config.block_size);
        let coordinator = RenderCoordinator::new(Arc::clone(&store), compositor, scene.clone());
        let guard = ConfigEpochGuard::new(scene.clone(), coordinator.clone());

        info!(
            block_size = config.block_size,
            cache_capacity = config.tile_cache_capacity,
            load_timeout_ms = config.tile_load_timeout_ms,
            "Mosaic service created"
        );

        Ok(Self {
            config,
            scene,
            store,
            coordinator,
            guard,
        })
    }

    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    // =========================================================================
    // Scene lifecycle
    // =========================================================================

    /// Load a stylesheet and mark the scene loaded.
    pub fn load_stylesheet(&self, sheet: &Stylesheet) {
        self.scene.load(sheet);
    }

    /// Mark the scene unloaded until the next [`load_stylesheet`](Self::load_stylesheet).
    pub fn begin_reload(&self) {
        self.scene.begin_reload();
    }

    pub fn scene(&self) -> &SceneHandle {
        &self.scene
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
        self.scene.subscribe()
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// See [`RenderCoordinator::render_tiles`].
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
        self.coordinator
            .render_tiles(destination, draw_specs, tiles, on_done)
    }

    pub fn release_render(&self, render: RenderRef) {
        self.coordinator.release_render(render);
    }

    pub fn coordinator(&self) -> &RenderCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<TileStore> {
        &self.store
    }

    // =========================================================================
    // Configuration changes
    // =========================================================================

    pub fn set_filter(&self, layer: impl Into<String>, filter: Option<Value>) -> ConfigUpdate {
        self.guard.submit(ConfigMutation::SetFilter {
            layer: layer.into(),
            filter,
        })
    }

    pub fn set_paint_property(
        &self,
        layer: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> ConfigUpdate {
        self.guard.submit(ConfigMutation::SetPaintProperty {
            layer: layer.into(),
            property: property.into(),
            value,
        })
    }

    pub fn set_layer_visibility(&self, layer: impl Into<String>, visible: bool) -> ConfigUpdate {
        self.guard.submit(ConfigMutation::SetLayerVisibility {
            layer: layer.into(),
            visible,
        })
    }

    pub fn set_visible_layers<I, S>(&self, layers: I) -> ConfigUpdate
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guard.submit(ConfigMutation::SetVisibleLayers {
            layers: layers.into_iter().map(Into::into).collect(),
        })
    }

    pub fn set_zoom_filter(&self, zoom: f32) -> ConfigUpdate {
        self.guard.submit(ConfigMutation::SetZoomFilter { zoom })
    }

    /// Queue a change without committing it.
    pub fn stage(&self, mutation: ConfigMutation) -> StagedChange {
        self.guard.stage(mutation)
    }

    pub fn config_epoch(&self) -> u64 {
        self.guard.epoch()
    }

    // =========================================================================
    // Scene queries
    // =========================================================================

    pub fn visible_sources(&self, zoom: Option<f32>) -> Vec<String> {
        self.scene.read().visible_sources(zoom)
    }

    pub fn layers_visible(&self, zoom: Option<f32>, source: Option<&str>) -> Vec<String> {
        self.scene.read().layers_visible(zoom, source)
    }

    pub fn original_filter(&self, layer: &str) -> Option<Value> {
        self.scene.read().original_filter(layer)
    }

    pub fn original_paint(&self, layer: &str) -> Option<Map<String, Value>> {
        self.scene.read().original_paint(layer)
    }

    pub fn stats(&self) -> MosaicStats {
        MosaicStats {
            store: self.store.stats(),
            render: self.coordinator.stats(),
            compositor: self.coordinator.compositor().stats(),
            config_epoch: self.guard.epoch(),
        }
    }
}

impl std::fmt::Debug for MosaicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicService")
            .field("config", &self.config)
            .field("scene", &self.scene)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
