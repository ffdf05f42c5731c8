//! Epoch-guarded configuration changes.
//!
//! Configuration changes are queued and applied in batches. Every committed
//! change bumps a monotonically increasing epoch; when a batch is applied only
//! the change holding the latest epoch does the work, so a burst of changes
//! costs one cancel-and-recalculate pass:
//!
//! ```text
//!   submit(A) ─► queue [A]     epoch 1 ──┐
//!   submit(B) ─► queue [A, B]  epoch 2 ──┤   scene loaded
//!                                        ▼
//!                       A: epoch 1 ≠ 2 ─► false
//!                       B: epoch 2 = 2 ─► cancel_all, apply A then B,
//!                                         recalculate, ConfigChanged ─► true
//! ```
//!
//! # Example
//!
//! ```ignore
//! let a = guard.submit(ConfigMutation::SetZoomFilter { zoom: 12.0 });
//! let b = guard.submit(ConfigMutation::SetLayerVisibility { layer: "roads".into(), visible: false });
//! assert!(!a.await);
//! assert!(b.await);
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Scene, SceneEvent, SceneHandle};
use crate::config::ConfigError;
use crate::render::RenderCoordinator;

/// A queued change to the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigMutation {
    /// Replace a layer's filter; `None` removes it.
    SetFilter { layer: String, filter: Option<Value> },
    /// Set one paint property; `Value::Null` removes it.
    SetPaintProperty {
        layer: String,
        property: String,
        value: Value,
    },
    SetLayerVisibility { layer: String, visible: bool },
    /// Show exactly these layers and hide every other one.
    SetVisibleLayers { layers: Vec<String> },
    /// Zoom level used for source visibility.
    SetZoomFilter { zoom: f32 },
}

impl ConfigMutation {
    fn apply(self, scene: &mut Scene) -> Result<(), ConfigError> {
        match self {
            ConfigMutation::SetFilter { layer, filter } => scene.set_filter(&layer, filter),
            ConfigMutation::SetPaintProperty {
                layer,
                property,
                value,
            } => scene.set_paint_property(&layer, &property, value),
            ConfigMutation::SetLayerVisibility { layer, visible } => {
                scene.set_layer_visibility(&layer, visible)
            }
            ConfigMutation::SetVisibleLayers { layers } => {
                scene.set_visible_layers(&layers);
                Ok(())
            }
            ConfigMutation::SetZoomFilter { zoom } => {
                scene.set_zoom_filter(zoom);
                Ok(())
            }
        }
    }
}

struct GuardInner {
    epoch: AtomicU64,
    queue: Mutex<VecDeque<ConfigMutation>>,
    /// Serializes batch application.
    apply: Mutex<()>,
    scene: SceneHandle,
    coordinator: RenderCoordinator,
}

/// Sequences configuration changes against in-flight renders.
///
/// Cheap to clone; clones share the queue and epoch.
#[derive(Clone)]
pub struct ConfigEpochGuard {
    inner: Arc<GuardInner>,
}

impl ConfigEpochGuard {
    pub fn new(scene: SceneHandle, coordinator: RenderCoordinator) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                epoch: AtomicU64::new(0),
                queue: Mutex::new(VecDeque::new()),
                apply: Mutex::new(()),
                scene,
                coordinator,
            }),
        }
    }

    /// The latest committed epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Number of changes waiting to be applied.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queue a change and commit it immediately.
    ///
    /// Must be called within a Tokio runtime.
    pub fn submit(&self, mutation: ConfigMutation) -> ConfigUpdate {
        let epoch = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(mutation);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        debug!(epoch, "Configuration change submitted");
        self.spawn_apply(epoch)
    }

    /// Queue a change without committing it.
    ///
    /// The change is applied with the next committed batch, or when the
    /// returned [`StagedChange`] is committed.
    pub fn stage(&self, mutation: ConfigMutation) -> StagedChange {
        self.inner.queue.lock().push_back(mutation);
        debug!("Configuration change staged");
        StagedChange {
            guard: self.clone(),
        }
    }

    fn commit(&self) -> ConfigUpdate {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "Staged configuration committed");
        self.spawn_apply(epoch)
    }

    fn spawn_apply(&self, epoch: u64) -> ConfigUpdate {
        let guard = self.clone();
        let task = tokio::spawn(async move {
            guard.inner.scene.wait_loaded().await;
            guard.apply_if_current(epoch)
        });
        ConfigUpdate {
            epoch,
            guard: self.clone(),
            task,
        }
    }

    /// Apply the whole queue if `epoch` is still the latest one.
    fn apply_if_current(&self, epoch: u64) -> bool {
        let _batch = self.inner.apply.lock();

        let current = self.epoch();
        if current != epoch {
            debug!(epoch, current, "Configuration change superseded");
            return false;
        }

        let mutations: Vec<ConfigMutation> = self.inner.queue.lock().drain(..).collect();

        // No render may start between the cancel and the scene update.
        self.inner.coordinator.cancel_all_then(|| {
            let mut scene = self.inner.scene.write();
            for mutation in mutations {
                if let Err(e) = mutation.apply(&mut scene) {
                    warn!(error = %e, "Configuration change skipped");
                }
            }
            scene.recalculate();
        });

        info!(epoch, "Configuration applied");
        self.inner.scene.emit(SceneEvent::ConfigChanged { epoch });
        true
    }
}

impl std::fmt::Debug for ConfigEpochGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigEpochGuard")
            .field("epoch", &self.epoch())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Deferred outcome of a committed change.
///
/// Resolves to `true` when this change's epoch was the latest when the batch
/// was applied, and `false` when a later change superseded it (in which case
/// the later change applied this one too).
#[must_use = "the update applies regardless, but its outcome is lost"]
pub struct ConfigUpdate {
    epoch: u64,
    guard: ConfigEpochGuard,
    task: JoinHandle<bool>,
}

impl ConfigUpdate {
    /// Epoch assigned when the change was committed.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Resolve to `Ok` when current, or [`ConfigError::Superseded`].
    pub async fn current_or_superseded(self) -> Result<(), ConfigError> {
        let epoch = self.epoch;
        let guard = self.guard.clone();
        if self.await {
            Ok(())
        } else {
            Err(ConfigError::Superseded {
                epoch,
                current: guard.epoch(),
            })
        }
    }
}

impl Future for ConfigUpdate {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(current)) => Poll::Ready(current),
            Poll::Ready(Err(e)) => {
                warn!(epoch = self.epoch, error = %e, "Configuration task failed");
                Poll::Ready(false)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for ConfigUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigUpdate").field("epoch", &self.epoch).finish()
    }
}

/// A queued change that has not bumped the epoch yet.
#[must_use = "a staged change only applies with a later commit"]
pub struct StagedChange {
    guard: ConfigEpochGuard,
}

impl StagedChange {
    /// Bump the epoch and apply the queue once the scene is loaded.
    pub fn commit(self) -> ConfigUpdate {
        self.guard.commit()
    }
}

impl std::fmt::Debug for StagedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedChange").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{basic_stylesheet, coordinator_fixture};
    use serde_json::json;

    fn fixture() -> (SceneHandle, ConfigEpochGuard) {
        let (scene, _store, coordinator, _loader) = coordinator_fixture();
        let guard = ConfigEpochGuard::new(scene.clone(), coordinator);
        (scene, guard)
    }

    fn hide(layer: &str) -> ConfigMutation {
        ConfigMutation::SetLayerVisibility {
            layer: layer.to_string(),
            visible: false,
        }
    }

    #[tokio::test]
    async fn test_back_to_back_before_load() {
        let (scene, guard) = fixture();
        let mut events = scene.subscribe();

        let a = guard.submit(hide("water"));
        let b = guard.submit(ConfigMutation::SetZoomFilter { zoom: 12.0 });
        assert_eq!((a.epoch(), b.epoch()), (1, 2));

        scene.load(&basic_stylesheet());

        assert!(!a.await);
        assert!(b.await);
        assert!(scene.read().layers_visible(None, Some("s1")).is_empty());
        assert_eq!(scene.read().zoom_filter(), 12.0);
        assert_eq!(guard.queued(), 0);

        assert_eq!(events.recv().await.unwrap(), SceneEvent::Loaded);
        assert_eq!(
            events.recv().await.unwrap(),
            SceneEvent::ConfigChanged { epoch: 2 }
        );
    }

    #[tokio::test]
    async fn test_single_change_after_load() {
        let (scene, guard) = fixture();
        scene.load(&basic_stylesheet());
        let revision = scene.read().revision();

        let update = guard.submit(ConfigMutation::SetFilter {
            layer: "water".to_string(),
            filter: Some(json!(["==", "kind", "sea"])),
        });
        assert!(update.current_or_superseded().await.is_ok());
        assert_eq!(
            scene.read().layer("water").unwrap().filter,
            Some(json!(["==", "kind", "sea"]))
        );
        assert_eq!(scene.read().revision(), revision + 1);
    }

    #[tokio::test]
    async fn test_superseded_error() {
        let (scene, guard) = fixture();
        let a = guard.submit(hide("water"));
        let b = guard.submit(hide("roads"));
        scene.load(&basic_stylesheet());

        let err = a.current_or_superseded().await.unwrap_err();
        assert!(matches!(err, ConfigError::Superseded { epoch: 1, current: 2 }));
        assert!(b.await);
    }

    #[tokio::test]
    async fn test_staged_change_waits_for_commit() {
        let (scene, guard) = fixture();
        scene.load(&basic_stylesheet());

        let staged = guard.stage(hide("water"));
        assert_eq!(guard.epoch(), 0);
        assert_eq!(guard.queued(), 1);

        let update = staged.commit();
        assert_eq!(update.epoch(), 1);
        assert!(update.await);
        assert!(!scene.read().layer("water").unwrap().visible);
    }

    #[tokio::test]
    async fn test_staged_change_rides_with_later_submit() {
        let (scene, guard) = fixture();
        scene.load(&basic_stylesheet());

        let _staged = guard.stage(hide("water"));
        assert!(guard.submit(hide("roads")).await);

        let scene = scene.read();
        assert!(!scene.layer("water").unwrap().visible);
        assert!(!scene.layer("roads").unwrap().visible);
    }

    #[tokio::test]
    async fn test_unknown_layer_does_not_block_batch() {
        let (scene, guard) = fixture();
        scene.load(&basic_stylesheet());

        let _ = guard.stage(hide("ghost"));
        assert!(guard.submit(hide("roads")).await);
        assert!(!scene.read().layer("roads").unwrap().visible);
    }

    #[tokio::test]
    async fn test_waits_while_reloading() {
        let (scene, guard) = fixture();
        scene.load(&basic_stylesheet());
        scene.begin_reload();

        let update = guard.submit(hide("water"));
        tokio::task::yield_now().await;
        assert_eq!(guard.queued(), 1);

        scene.load(&basic_stylesheet());
        assert!(update.await);
        assert_eq!(guard.queued(), 0);
    }
}
