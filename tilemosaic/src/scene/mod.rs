//! The style model renders are painted against.
//!
//! A [`Scene`] is built from a [`Stylesheet`] and then mutated only through
//! queued configuration changes (see [`ConfigEpochGuard`]). It answers the
//! visibility questions callers use to decide which tiles to request.
//!
//! # Lifecycle
//!
//! ```text
//!   SceneHandle::new()          load(stylesheet)           begin_reload()
//!  ┌──────────────────┐  ───►  ┌─────────────────┐  ───►  ┌──────────────────┐
//!  │ unloaded (empty) │        │ loaded          │        │ unloaded         │
//!  └──────────────────┘        │ config applies  │  ◄───  │ config waits     │
//!                              └─────────────────┘  load  └──────────────────┘
//! ```
//!
//! Queued configuration changes wait for the loaded state before applying.

mod epoch;
mod style;

pub use epoch::{ConfigEpochGuard, ConfigMutation, ConfigUpdate, StagedChange};
pub use style::{StyleLayer, Stylesheet};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::config::ConfigError;

/// Zoom level used by [`Scene::visible_sources`] when none is given.
pub const DEFAULT_ZOOM_FILTER: f32 = 15.0;

/// Capacity of the scene event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Scene
// =============================================================================

/// Current style state of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub id: String,
    pub kind: String,
    pub source: Option<String>,
    pub source_layer: Option<String>,
    pub visible: bool,
    pub filter: Option<Value>,
    pub paint: Map<String, Value>,
    pub min_zoom: Option<f32>,
    pub max_zoom: Option<f32>,
}

impl LayerStyle {
    fn from_style_layer(layer: &StyleLayer) -> Self {
        Self {
            id: layer.id.clone(),
            kind: layer.kind.clone(),
            source: layer.source.clone(),
            source_layer: layer.source_layer.clone(),
            visible: layer.is_visible(),
            filter: layer.filter.clone(),
            paint: layer.paint.clone(),
            min_zoom: layer.minzoom,
            max_zoom: layer.maxzoom,
        }
    }

    /// Whether `zoom` lies in `[min_zoom, max_zoom]`; missing bounds are open.
    pub fn contains_zoom(&self, zoom: f32) -> bool {
        self.min_zoom.map_or(true, |min| zoom >= min) && self.max_zoom.map_or(true, |max| zoom <= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OriginalStyle {
    filter: Option<Value>,
    paint: Map<String, Value>,
}

/// Paintable layers, sources and the zoom filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    sources: Vec<String>,
    layers: Vec<LayerStyle>,
    originals: HashMap<String, OriginalStyle>,
    zoom_filter: f32,
    revision: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            layers: Vec::new(),
            originals: HashMap::new(),
            zoom_filter: DEFAULT_ZOOM_FILTER,
            revision: 0,
        }
    }
}

impl Scene {
    /// Build a scene, dropping layers the vector pipeline cannot paint.
    pub fn from_stylesheet(sheet: &Stylesheet) -> Self {
        let paintable: Vec<&StyleLayer> = sheet.layers.iter().filter(|l| l.is_paintable()).collect();

        let originals = paintable
            .iter()
            .map(|l| {
                (
                    l.id.clone(),
                    OriginalStyle {
                        filter: l.filter.clone(),
                        paint: l.paint.clone(),
                    },
                )
            })
            .collect();

        Self {
            sources: sheet.source_names().map(str::to_owned).collect(),
            layers: paintable.into_iter().map(LayerStyle::from_style_layer).collect(),
            originals,
            zoom_filter: DEFAULT_ZOOM_FILTER,
            revision: 0,
        }
    }

    pub fn layers(&self) -> &[LayerStyle] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&LayerStyle> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Zoom level used for source visibility when the caller gives none.
    pub fn zoom_filter(&self) -> f32 {
        self.zoom_filter
    }

    /// Bumped every time configuration changes are applied.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Ids of visible layers, in style order.
    ///
    /// With `zoom`, only layers whose zoom range contains it; with `source`,
    /// only layers drawn from that source.
    pub fn layers_visible(&self, zoom: Option<f32>, source: Option<&str>) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.visible)
            .filter(|l| zoom.map_or(true, |z| l.contains_zoom(z)))
            .filter(|l| source.map_or(true, |s| l.source.as_deref() == Some(s)))
            .map(|l| l.id.clone())
            .collect()
    }

    /// Sources with at least one visible layer at `zoom` (default: the zoom filter).
    pub fn visible_sources(&self, zoom: Option<f32>) -> Vec<String> {
        let zoom = zoom.unwrap_or(self.zoom_filter);
        let used: BTreeSet<&str> = self
            .layers
            .iter()
            .filter(|l| l.visible && l.contains_zoom(zoom))
            .filter_map(|l| l.source.as_deref())
            .collect();
        self.sources
            .iter()
            .filter(|s| used.contains(s.as_str()))
            .cloned()
            .collect()
    }

    /// The filter the layer had when the stylesheet was loaded.
    pub fn original_filter(&self, layer: &str) -> Option<Value> {
        self.originals.get(layer).and_then(|o| o.filter.clone())
    }

    /// The paint properties the layer had when the stylesheet was loaded.
    pub fn original_paint(&self, layer: &str) -> Option<Map<String, Value>> {
        self.originals.get(layer).map(|o| o.paint.clone())
    }

    pub(crate) fn set_filter(&mut self, layer: &str, filter: Option<Value>) -> Result<(), ConfigError> {
        self.layer_mut(layer)?.filter = filter;
        Ok(())
    }

    pub(crate) fn set_paint_property(
        &mut self,
        layer: &str,
        property: &str,
        value: Value,
    ) -> Result<(), ConfigError> {
        let style = self.layer_mut(layer)?;
        if value.is_null() {
            style.paint.remove(property);
        } else {
            style.paint.insert(property.to_owned(), value);
        }
        Ok(())
    }

    pub(crate) fn set_layer_visibility(&mut self, layer: &str, visible: bool) -> Result<(), ConfigError> {
        self.layer_mut(layer)?.visible = visible;
        Ok(())
    }

    /// Show exactly the named layers and hide the rest. Unknown names are ignored.
    pub(crate) fn set_visible_layers(&mut self, visible: &[String]) {
        for layer in &mut self.layers {
            layer.visible = visible.iter().any(|id| *id == layer.id);
        }
    }

    pub(crate) fn set_zoom_filter(&mut self, zoom: f32) {
        self.zoom_filter = zoom;
    }

    /// Re-derive state after a batch of changes.
    pub(crate) fn recalculate(&mut self) {
        self.revision += 1;
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut LayerStyle, ConfigError> {
        self.layers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| ConfigError::UnknownLayer(id.to_owned()))
    }
}

// =============================================================================
// SceneHandle
// =============================================================================

/// Notifications about scene changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    /// A stylesheet finished loading.
    Loaded,
    /// Queued configuration changes were applied under `epoch`.
    ConfigChanged { epoch: u64 },
}

/// Shared access to the scene plus its loaded state.
#[derive(Clone)]
pub struct SceneHandle {
    scene: Arc<RwLock<Scene>>,
    loaded: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<SceneEvent>,
}

impl Default for SceneHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneHandle {
    /// Create an unloaded, empty scene.
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            scene: Arc::new(RwLock::new(Scene::default())),
            loaded: Arc::new(loaded),
            events,
        }
    }

    /// Replace the scene with one built from `sheet` and mark it loaded.
    ///
    /// The zoom filter survives reloads.
    pub fn load(&self, sheet: &Stylesheet) {
        {
            let mut scene = self.scene.write();
            let mut next = Scene::from_stylesheet(sheet);
            next.zoom_filter = scene.zoom_filter;
            next.revision = scene.revision + 1;
            info!(
                layers = next.layers.len(),
                sources = next.sources.len(),
                "Scene loaded"
            );
            *scene = next;
        }
        self.loaded.send_replace(true);
        let _ = self.events.send(SceneEvent::Loaded);
    }

    /// Mark the scene unloaded; queued configuration waits for the next load.
    pub fn begin_reload(&self) {
        debug!("Scene reload started");
        self.loaded.send_replace(false);
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Resolve once the scene is loaded.
    pub async fn wait_loaded(&self) {
        let mut rx = self.loaded.subscribe();
        // The sender lives as long as `self`, so this only ends on load.
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Scene> {
        self.scene.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Scene> {
        self.scene.write()
    }

    /// Subscribe to [`SceneEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<SceneEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SceneEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for SceneHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneHandle")
            .field("loaded", &self.is_loaded())
            .field("revision", &self.scene.read().revision)
            .finish()
    }
}
