//! Block-stitched compositing over a bounded working surface.
//!
//! The [`Renderer`] only ever paints a `B × B` [`Surface`]. Requests can be
//! larger, so the compositor partitions the bounding box of every consumer's
//! source rectangle into `B × B` blocks, paints each block that some
//! rectangle touches, and copies the overlap out to each consumer.
//!
//! ```text
//!  mosaic plane (canonical)           block (xx, yy)              destination
//!  ┌─────────┬─────────┬──┐          ┌─────────┐
//!  │ block 0 │ block 1 │  │  paint   │ ▓▓▓▓▓▓▓ │  blit overlap   ┌──────────┐
//!  │   ┌─────┼─────┐   │  │ ───────► │ ▓▓▓▓▓▓▓ │ ──────────────► │  ▓▓▓▓▓▓  │
//!  │   │ src │rect │   │  │          └─────────┘                 └──────────┘
//!  └───┴─────┴─────┴───┴──┘
//! ```
//!
//! Each block costs one `paint` call. Blocks no rectangle touches are skipped.

mod block;
mod destination;
mod surface;

pub use destination::{DestRect, Destination, PixmapDestination};
pub use surface::{PixelRect, Surface};

use std::sync::atomic::{AtomicU64, Ordering};

use tiny_skia::Transform;
use tracing::{debug, warn};

use crate::request::{DrawSpec, TileSpec};
use crate::scene::Scene;
use crate::tile::{TileData, TileKey};
use surface::SurfaceSlot;

/// Default working surface edge length in pixels.
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

// =============================================================================
// Renderer capability
// =============================================================================

/// External paint engine.
///
/// Decodes tile data and paints it onto the surface according to the scene.
/// Painting cannot fail from the compositor's point of view; a renderer that
/// cannot draw a tile simply leaves its pixels untouched.
pub trait Renderer: Send + Sync {
    /// Paint `tiles` into `surface`, which is cleared beforehand.
    fn paint(&self, scene: &Scene, tiles: &[TileProjection], surface: &mut Surface);
}

/// Placement of a tile relative to the block being painted.
///
/// The tile's top-left corner sits at `(translate_x, translate_y)` surface
/// pixels and `scale` is the tile's edge length as a fraction of the block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockTransform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale: f32,
}

impl BlockTransform {
    fn new(tile: &TileSpec, xx: i64, yy: i64, block: u32) -> Self {
        Self {
            translate_x: (tile.left as i64 - xx) as f32,
            translate_y: (tile.top as i64 - yy) as f32,
            scale: tile.size as f32 / block as f32,
        }
    }

    /// Map tile-local units (`0..extent` on each axis) to surface pixels.
    pub fn to_pixel_transform(&self, extent: f32, block: u32) -> Transform {
        let px = self.scale * block as f32 / extent;
        Transform::from_row(px, 0.0, 0.0, px, self.translate_x, self.translate_y)
    }
}

/// A settled tile handed to the [`Renderer`] for one block.
#[derive(Debug, Clone)]
pub struct TileProjection {
    pub key: TileKey,
    pub data: TileData,
    /// Canonical placement on the mosaic plane.
    pub left: i32,
    pub top: i32,
    pub size: u32,
    pub transform: BlockTransform,
}

/// A consumer's destination together with its source rectangles.
pub struct CompositeTarget<'a> {
    pub destination: &'a dyn Destination,
    pub draw_specs: &'a [DrawSpec],
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct CompositorCounters {
    blocks_painted: AtomicU64,
    blocks_skipped: AtomicU64,
    blits: AtomicU64,
    clears: AtomicU64,
}

/// Point-in-time copy of the compositor statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub blocks_painted: u64,
    pub blocks_skipped: u64,
    pub blits: u64,
    pub clears: u64,
}

// =============================================================================
// Compositor
// =============================================================================

/// Drives a [`Renderer`] block by block and writes results to destinations.
pub struct Compositor {
    renderer: Box<dyn Renderer>,
    block_size: u32,
    surface: SurfaceSlot,
    counters: CompositorCounters,
}

impl Compositor {
    /// Create a compositor painting `block_size × block_size` blocks.
    pub fn new(renderer: Box<dyn Renderer>, block_size: u32) -> Self {
        Self {
            renderer,
            block_size,
            surface: SurfaceSlot::new(block_size),
            counters: CompositorCounters::default(),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Paint the available tiles and blit every target's rectangles.
    ///
    /// Regions not covered by any available tile are blitted as painted
    /// (typically transparent); regions outside the targets' rectangles are
    /// never written.
    pub fn composite(
        &self,
        scene: &Scene,
        tiles: &[(TileSpec, TileData)],
        targets: &[CompositeTarget<'_>],
    ) {
        let Some(bbox) = block::bounding_box(targets.iter().flat_map(|t| t.draw_specs.iter()))
        else {
            debug!("Nothing to composite");
            return;
        };

        let Some(mut surface) = self.surface.lease() else {
            warn!(block_size = self.block_size, "Working surface unavailable");
            return;
        };

        let block = self.block_size;
        for (xx, yy) in block::block_origins(bbox, block) {
            let relevant = targets
                .iter()
                .flat_map(|t| t.draw_specs.iter())
                .any(|spec| block::intersects(spec, xx, yy, block));
            if !relevant {
                self.counters.blocks_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let projections: Vec<TileProjection> = tiles
                .iter()
                .map(|(spec, data)| TileProjection {
                    key: spec.key.clone(),
                    data: data.clone(),
                    left: spec.left,
                    top: spec.top,
                    size: spec.size,
                    transform: BlockTransform::new(spec, xx, yy, block),
                })
                .collect();

            surface.clear();
            self.renderer.paint(scene, &projections, &mut surface);
            self.counters.blocks_painted.fetch_add(1, Ordering::Relaxed);

            for target in targets {
                for spec in target.draw_specs {
                    if let Some(op) = block::overlap(spec, xx, yy, block) {
                        target
                            .destination
                            .blit(&surface, op.src, op.dest_left, op.dest_top);
                        self.counters.blits.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// Clear every target's destination rectangles.
    pub fn clear(&self, targets: &[CompositeTarget<'_>]) {
        for target in targets {
            for spec in target.draw_specs {
                target.destination.clear(DestRect::new(
                    spec.dest_left,
                    spec.dest_top,
                    spec.width,
                    spec.height,
                ));
                self.counters.clears.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> CompositorStats {
        CompositorStats {
            blocks_painted: self.counters.blocks_painted.load(Ordering::Relaxed),
            blocks_skipped: self.counters.blocks_skipped.load(Ordering::Relaxed),
            blits: self.counters.blits.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("block_size", &self.block_size)
            .finish()
    }
}
