//! Engine configuration and configuration errors.
//!
//! [`MosaicConfig`] holds the tunables of the engine. It deserializes from
//! any serde format so hosts can embed it in their own config files:
//!
//! ```json
//! { "block_size": 512, "tile_cache_capacity": 200, "tile_load_timeout_ms": 30000 }
//! ```
//!
//! Missing fields fall back to the `DEFAULT_*` constants.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::compositor::DEFAULT_BLOCK_SIZE;

/// Default number of idle tiles kept in the LRU cache.
pub const DEFAULT_TILE_CACHE_CAPACITY: u64 = 100;

/// Default deadline for a single tile load, in milliseconds.
pub const DEFAULT_TILE_LOAD_TIMEOUT_MS: u64 = 60_000;

/// Errors from configuration and configuration changes.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A later configuration change superseded this one.
    #[error("configuration change {epoch} superseded by {current}")]
    Superseded { epoch: u64, current: u64 },

    #[error("block size must be positive")]
    InvalidBlockSize,

    #[error("tile cache capacity must be positive")]
    InvalidCacheCapacity,

    #[error("tile load timeout must be positive")]
    InvalidTimeout,

    /// A change named a layer the scene does not have.
    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    #[error("invalid stylesheet: {0}")]
    Stylesheet(#[from] serde_json::Error),
}

/// Tunables of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    /// Edge length of the renderer's working surface in pixels.
    pub block_size: u32,
    /// Maximum number of idle tiles kept in the LRU cache.
    pub tile_cache_capacity: u64,
    /// Deadline for a single tile load in milliseconds.
    pub tile_load_timeout_ms: u64,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            tile_cache_capacity: DEFAULT_TILE_CACHE_CAPACITY,
            tile_load_timeout_ms: DEFAULT_TILE_LOAD_TIMEOUT_MS,
        }
    }
}

impl MosaicConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working surface edge length.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the LRU cache capacity.
    pub fn with_tile_cache_capacity(mut self, capacity: u64) -> Self {
        self.tile_cache_capacity = capacity;
        self
    }

    /// Set the per-load deadline.
    pub fn with_tile_load_timeout(mut self, timeout: Duration) -> Self {
        self.tile_load_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// The per-load deadline as a [`Duration`].
    pub fn tile_load_timeout(&self) -> Duration {
        Duration::from_millis(self.tile_load_timeout_ms)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize);
        }
        if self.tile_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        if self.tile_load_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}
