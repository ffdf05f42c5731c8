//! Tile load errors.

use std::time::Duration;

use thiserror::Error;

use super::TileKey;

/// Error reported by a [`TileLoader`](super::TileLoader) when a fetch fails.
///
/// Loaders are external collaborators, so the failure is carried as a
/// message rather than a typed source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    /// Create a fetch error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("I/O error: {}", e))
    }
}

/// Why a tile did not become available.
///
/// `Clone` because one load result is shared by every render waiting on
/// the same tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// The load did not complete within the configured deadline.
    #[error("tile {key} timed out after {}ms", after.as_millis())]
    Timeout { key: TileKey, after: Duration },

    /// The loader reported a failure.
    #[error("tile {key} failed to load: {message}")]
    Fetch { key: TileKey, message: String },

    /// The in-flight load was aborted because nobody needed the tile anymore.
    #[error("tile {key} load aborted")]
    Aborted { key: TileKey },

    /// The record had neither data nor a pending load.
    #[error("tile {key} is not loaded")]
    NotLoaded { key: TileKey },
}

impl TileError {
    /// The tile this error refers to.
    pub fn key(&self) -> &TileKey {
        match self {
            TileError::Timeout { key, .. }
            | TileError::Fetch { key, .. }
            | TileError::Aborted { key }
            | TileError::NotLoaded { key } => key,
        }
    }

    /// Returns true for a deadline failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TileError::Timeout { .. })
    }

    pub(crate) fn from_fetch(key: &TileKey, err: FetchError) -> Self {
        TileError::Fetch {
            key: key.clone(),
            message: err.message,
        }
    }
}
