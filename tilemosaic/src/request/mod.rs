//! Render request canonicalization.
//!
//! A render request names source tiles placed on a mosaic plane and the
//! rectangles of that plane each consumer wants copied out. Two requests that
//! differ only by where the whole layout sits on the plane are the same
//! render, so the request is shifted until its top-left-most coordinate is
//! zero and the tiles are serialized into a stable [`Fingerprint`].
//!
//! ```text
//!   absolute plane                         canonical plane
//!   (300,200)                              (0,0)
//!       ┌──────┬──────┐                      ┌──────┬──────┐
//!       │ 5/3/3│ 5/4/3│   shift by           │ 5/3/3│ 5/4/3│
//!       └──────┴──────┘   (-300,-200)  ──►   └──────┴──────┘
//!        └─ draw ─┘                           └─ draw ─┘
//! ```
//!
//! Only source coordinates move; destination offsets belong to the consumer
//! and are never shifted. A request whose extent does not fit the canonical
//! plane is rejected rather than clamped.
//!
//! # Example
//!
//! ```
//! use tilemosaic::request::{canonicalize, DrawSpec, TileSpec};
//! use tilemosaic::tile::TileKey;
//!
//! let tiles = [TileSpec::new(TileKey::new("s1", 5, 3, 3), 300, 200, 256)];
//! let draws = [DrawSpec::new(300, 200, 256, 256, 0, 0)];
//! let canonical = canonicalize(&tiles, &draws).unwrap();
//!
//! assert_eq!(canonical.tiles[0].left, 0);
//! assert_eq!(canonical.fingerprint.as_str(), "s1 5 3 3 0 0 256");
//! ```

use std::fmt;
use std::fmt::Write as _;

use thiserror::Error;

use crate::tile::TileKey;

/// Why a request cannot be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Source coordinates span more than `i32::MAX` pixels on one axis.
    #[error("request spans {span} pixels, more than the canonical plane holds")]
    SpanOverflow { span: i64 },
}

/// Placement of one source tile on the mosaic plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileSpec {
    pub key: TileKey,
    pub left: i32,
    pub top: i32,
    /// Edge length of the tile on the plane, in pixels.
    pub size: u32,
}

impl TileSpec {
    pub fn new(key: TileKey, left: i32, top: i32, size: u32) -> Self {
        Self {
            key,
            left,
            top,
            size,
        }
    }

    fn sort_key(&self) -> (&str, u8, u32, u32, i32, i32, u32) {
        (
            self.key.source.as_str(),
            self.key.z,
            self.key.x,
            self.key.y,
            self.left,
            self.top,
            self.size,
        )
    }
}

/// One rectangle to copy from the mosaic plane to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawSpec {
    pub src_left: i32,
    pub src_top: i32,
    pub width: u32,
    pub height: u32,
    pub dest_left: i32,
    pub dest_top: i32,
}

impl DrawSpec {
    pub fn new(
        src_left: i32,
        src_top: i32,
        width: u32,
        height: u32,
        dest_left: i32,
        dest_top: i32,
    ) -> Self {
        Self {
            src_left,
            src_top,
            width,
            height,
            dest_left,
            dest_top,
        }
    }

    /// Exclusive right edge of the source rectangle.
    pub fn src_right(&self) -> i64 {
        self.src_left as i64 + self.width as i64
    }

    /// Exclusive bottom edge of the source rectangle.
    pub fn src_bottom(&self) -> i64 {
        self.src_top as i64 + self.height as i64
    }

    /// Whether the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Stable identity of a tile layout, independent of absolute placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request shifted onto the canonical plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    /// Tiles in fingerprint order.
    pub tiles: Vec<TileSpec>,
    /// Draw rectangles in request order.
    pub draw_specs: Vec<DrawSpec>,
    /// Amount subtracted from every source coordinate, as `(left, top)`.
    pub offset: (i32, i32),
    pub fingerprint: Fingerprint,
}

/// Shift a request so its minimum source coordinate is zero and fingerprint it.
///
/// The minimum is taken over every tile placement and every draw rectangle.
/// An empty request keeps a zero offset.
///
/// # Errors
///
/// Returns [`RequestError::SpanOverflow`] when the shifted coordinates would
/// not fit in `i32`.
pub fn canonicalize(
    tiles: &[TileSpec],
    draw_specs: &[DrawSpec],
) -> Result<CanonicalRequest, RequestError> {
    let lefts = move || {
        tiles
            .iter()
            .map(|t| t.left)
            .chain(draw_specs.iter().map(|d| d.src_left))
    };
    let tops = move || {
        tiles
            .iter()
            .map(|t| t.top)
            .chain(draw_specs.iter().map(|d| d.src_top))
    };
    let min_left = lefts().min().unwrap_or(0);
    let min_top = tops().min().unwrap_or(0);

    let span_left = lefts().max().unwrap_or(0) as i64 - min_left as i64;
    let span_top = tops().max().unwrap_or(0) as i64 - min_top as i64;
    let span = span_left.max(span_top);
    if span > i32::MAX as i64 {
        return Err(RequestError::SpanOverflow { span });
    }

    // Every difference is at most `span`, so the result fits.
    let shift = |v: i32, min: i32| (v as i64 - min as i64) as i32;

    let mut shifted: Vec<TileSpec> = tiles
        .iter()
        .map(|t| TileSpec {
            key: t.key.clone(),
            left: shift(t.left, min_left),
            top: shift(t.top, min_top),
            size: t.size,
        })
        .collect();
    shifted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let draw_specs = draw_specs
        .iter()
        .map(|d| DrawSpec {
            src_left: shift(d.src_left, min_left),
            src_top: shift(d.src_top, min_top),
            ..*d
        })
        .collect();

    let fingerprint = fingerprint(&shifted);

    Ok(CanonicalRequest {
        tiles: shifted,
        draw_specs,
        offset: (min_left, min_top),
        fingerprint,
    })
}

/// Serialize sorted tiles as space-separated `source z x y left top size` entries.
///
/// Spaces and backslashes in source names are escaped so distinct tile sets
/// never serialize alike.
fn fingerprint(sorted: &[TileSpec]) -> Fingerprint {
    let mut out = String::new();
    for (i, t) in sorted.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        for c in t.key.source.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                ' ' => out.push_str("\\s"),
                c => out.push(c),
            }
        }
        let _ = write!(
            out,
            " {} {} {} {} {} {}",
            t.key.z, t.key.x, t.key.y, t.left, t.top, t.size
        );
    }
    Fingerprint(out)
}
