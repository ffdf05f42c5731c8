//! Render outcomes, phases and statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::request::RequestError;
use crate::tile::TileError;

/// Why a render did not complete cleanly.
///
/// `Clone` because one outcome is delivered to every coalesced consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The only requested tile failed.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// The request was rejected before any tile was acquired.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// None of the requested tiles became available; destinations were cleared.
    #[error("none of {total} tiles available")]
    AllTilesUnavailable { total: usize },

    /// Some tiles failed; the rest were composited.
    #[error("{failed} of {total} tiles not available")]
    PartialTilesUnavailable { failed: usize, total: usize },

    /// The consumer was released, or all renders were canceled.
    #[error("render canceled")]
    Canceled,

    /// The last consumer of the render was released before it finished.
    #[error("render fully canceled")]
    FullyCanceled,
}

impl RenderError {
    /// Returns true for the cancellation variants.
    pub fn is_canceled(&self) -> bool {
        matches!(self, RenderError::Canceled | RenderError::FullyCanceled)
    }

    /// Returns true when the destination may hold partly rendered pixels.
    pub fn is_partial(&self) -> bool {
        matches!(self, RenderError::PartialTilesUnavailable { .. })
    }
}

/// Lifecycle of a pending render.
///
/// ```text
/// Loading ──► Compositing ──► Done
///    │             │
///    └─────────────┴──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPhase {
    /// Waiting for tile loads to settle.
    Loading,
    /// Painting blocks and blitting to consumers.
    Compositing,
    /// Consumers notified.
    Done,
    /// Finished without compositing.
    Canceled,
}

impl RenderPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderPhase::Done | RenderPhase::Canceled)
    }
}

/// Coordinator counters.
#[derive(Debug, Default)]
pub(crate) struct RenderCounters {
    pub(crate) total_requests: AtomicU64,
    pub(crate) coalesced_requests: AtomicU64,
    pub(crate) new_renders: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) canceled: AtomicU64,
    pub(crate) fully_canceled: AtomicU64,
    pub(crate) partial_failures: AtomicU64,
    pub(crate) total_failures: AtomicU64,
    pub(crate) rejected_requests: AtomicU64,
}

impl RenderCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize) -> RenderStats {
        RenderStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            new_renders: self.new_renders.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            fully_canceled: self.fully_canceled.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            pending,
        }
    }
}

/// Statistics about the render coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Total `render_tiles` calls
    pub total_requests: u64,
    /// Calls that joined an in-flight render
    pub coalesced_requests: u64,
    /// Calls that started a new render
    pub new_renders: u64,
    /// Renders that reached compositing
    pub completed: u64,
    /// Renders finished by `cancel_all`
    pub canceled: u64,
    /// Renders whose consumers were all released first
    pub fully_canceled: u64,
    /// Completed renders with some failed tiles
    pub partial_failures: u64,
    /// Completed renders with no available tiles
    pub total_failures: u64,
    /// Calls rejected as malformed
    pub rejected_requests: u64,
    /// Renders currently in flight
    pub pending: usize,
}

impl RenderStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}
