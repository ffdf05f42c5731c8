//! Tile keys and payloads.

use std::fmt;

use bytes::Bytes;

/// Identifier of a fetchable tile.
///
/// Two keys are equal when they name the same source and the same
/// `z/x/y` address. The ordering is `(source, z, x, y)`, which is the order
/// used when building request fingerprints.
///
/// # Example
///
/// ```
/// use tilemosaic::tile::TileKey;
///
/// let key = TileKey::new("streets", 5, 3, 3);
/// assert_eq!(key.to_string(), "streets/5/3/3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Name of the tile source in the stylesheet.
    pub source: String,
    /// Zoom level.
    pub z: u8,
    /// Column in the tile grid.
    pub x: u32,
    /// Row in the tile grid.
    pub y: u32,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(source: impl Into<String>, z: u8, x: u32, y: u32) -> Self {
        Self {
            source: source.into(),
            z,
            x,
            y,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.source, self.z, self.x, self.y)
    }
}

/// Opaque tile payload as produced by a [`TileLoader`](super::TileLoader).
///
/// Wraps [`Bytes`] so handing the same payload to several renders never
/// copies the underlying buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct TileData {
    bytes: Bytes,
}

impl TileData {
    /// Wrap raw tile bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for TileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileData")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl From<Vec<u8>> for TileData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for TileData {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}
