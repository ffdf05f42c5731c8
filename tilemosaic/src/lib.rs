//! tilemosaic - coalescing, cached, block-stitched rendering of tile mosaics
//!
//! This library turns declarative render requests ("these source tiles,
//! placed here; copy this rectangle to that destination") into pixels while:
//!
//! - never fetching or rendering an identical tile set twice concurrently
//! - reusing loaded tile data across overlapping requests (bounded LRU cache)
//! - bounding the paint engine's working surface by stitching fixed-size blocks
//! - cancelling cooperatively as callers lose interest
//! - tolerating partial tile-fetch failure
//!
//! Fetching raw tile bytes ([`tile::TileLoader`]) and painting them
//! ([`compositor::Renderer`]) are external capabilities supplied by the host.
//!
//! # Modules
//!
//! - [`tile`] - tile keys, payloads and the loader capability
//! - [`store`] - tile ownership and caching
//! - [`request`] - request canonicalization and fingerprints
//! - [`render`] - render coalescing and lifecycle
//! - [`compositor`] - block-stitched compositing
//! - [`scene`] - style model and epoch-guarded configuration changes
//! - [`service`] - the assembled engine

pub mod compositor;
pub mod config;
pub mod logging;
pub mod render;
pub mod request;
pub mod scene;
pub mod service;
pub mod store;
pub mod tile;

pub use config::{ConfigError, MosaicConfig};
pub use service::{MosaicService, MosaicStats};

#[cfg(test)]
pub(crate) mod test_support;
