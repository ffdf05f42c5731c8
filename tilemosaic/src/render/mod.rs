//! Render coalescing and lifecycle.
//!
//! Every `render_tiles` call is canonicalized into a [`Fingerprint`]. Calls
//! with the same fingerprint while a render is in flight join it as extra
//! consumers instead of starting new work:
//!
//! ```text
//! render_tiles(A) ──► fingerprint F ──► no pending ──► acquire tiles, spawn load wait
//! render_tiles(B) ──► fingerprint F ──► pending(F) ──► acquire tiles again, join
//!                                            │
//!                   all loads settled ◄──────┘
//!                           │
//!                           ▼
//!               composite once, notify A then B
//! ```
//!
//! Each consumer gets a [`RenderRef`] holding its tile uses. Releasing the
//! ref before the render finishes cancels that consumer; releasing the last
//! one cancels the render.
//!
//! [`Fingerprint`]: crate::request::Fingerprint

mod consumer;
mod coordinator;
mod handle;
mod types;

pub use consumer::OnDone;
pub use coordinator::RenderCoordinator;
pub use handle::RenderRef;
pub use types::{RenderError, RenderPhase, RenderStats};
