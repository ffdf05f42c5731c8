//! Block partitioning of the source bounding box.

use crate::request::DrawSpec;

use super::PixelRect;

/// One copy out of a painted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlitOp {
    pub(crate) src: PixelRect,
    pub(crate) dest_left: i32,
    pub(crate) dest_top: i32,
}

/// Bounding box of the non-empty source rectangles, as `(left, top, right, bottom)`.
pub(crate) fn bounding_box<'a>(
    specs: impl IntoIterator<Item = &'a DrawSpec>,
) -> Option<(i64, i64, i64, i64)> {
    specs
        .into_iter()
        .filter(|s| !s.is_empty())
        .fold(None, |acc, s| {
            let (l, t, r, b) = (s.src_left as i64, s.src_top as i64, s.src_right(), s.src_bottom());
            Some(match acc {
                None => (l, t, r, b),
                Some((al, at, ar, ab)) => (al.min(l), at.min(t), ar.max(r), ab.max(b)),
            })
        })
}

/// Origins of the `block × block` cells covering the box, column-major from its top-left.
pub(crate) fn block_origins(
    bbox: (i64, i64, i64, i64),
    block: u32,
) -> impl Iterator<Item = (i64, i64)> {
    let (left, top, right, bottom) = bbox;
    let step = block as usize;
    (left..right)
        .step_by(step)
        .flat_map(move |xx| (top..bottom).step_by(step).map(move |yy| (xx, yy)))
}

/// Whether the source rectangle intersects the block at `(xx, yy)`.
pub(crate) fn intersects(spec: &DrawSpec, xx: i64, yy: i64, block: u32) -> bool {
    let b = block as i64;
    !spec.is_empty()
        && spec.src_right() > xx
        && (spec.src_left as i64) < xx + b
        && spec.src_bottom() > yy
        && (spec.src_top as i64) < yy + b
}

/// The part of `spec` that falls in the block at `(xx, yy)`.
pub(crate) fn overlap(spec: &DrawSpec, xx: i64, yy: i64, block: u32) -> Option<BlitOp> {
    if !intersects(spec, xx, yy, block) {
        return None;
    }
    let b = block as i64;
    let src_left = spec.src_left as i64;
    let src_top = spec.src_top as i64;

    let x0 = (src_left - xx).max(0);
    let x1 = (spec.src_right() - xx).min(b);
    let y0 = (src_top - yy).max(0);
    let y1 = (spec.src_bottom() - yy).min(b);

    Some(BlitOp {
        src: PixelRect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32),
        dest_left: (spec.dest_left as i64 + (xx - src_left).max(0)) as i32,
        dest_top: (spec.dest_top as i64 + (yy - src_top).max(0)) as i32,
    })
}
