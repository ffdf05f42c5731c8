//! Tile identity, payloads and the loader capability.
//!
//! A tile is addressed by a [`TileKey`] (`source/z/x/y`). Raw tile bytes are
//! produced by an external [`TileLoader`] and carried around as [`TileData`],
//! which is cheap to clone and never interpreted by the orchestration core.
//!
//! # Architecture
//!
//! ```text
//! TileStore ──fetch(key)──► TileLoader ──► Future<TileData, FetchError>
//!     │                         ▲
//!     └──abort(key)/unload(rec)─┘
//! ```

mod error;
mod key;
mod loader;

pub use error::{FetchError, TileError};
pub use key::{TileData, TileKey};
pub use loader::{BoxFuture, TileLoader};
