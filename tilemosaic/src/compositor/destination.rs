//! Blit targets.

use parking_lot::Mutex;
use tiny_skia::{IntRect, Pixmap, PixmapPaint, PremultipliedColorU8, Transform};

use super::{PixelRect, Surface};

/// Rectangle on a destination, in destination pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl DestRect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Where a consumer wants its pixels.
///
/// The compositor only ever writes inside the consumer's destination
/// rectangles. Transparent surface pixels mark regions no available tile
/// covered; blitting them over existing content should leave it as is.
pub trait Destination: Send + Sync {
    /// Copy `src` of `surface` so its top-left lands at `(dest_left, dest_top)`.
    fn blit(&self, surface: &Surface, src: PixelRect, dest_left: i32, dest_top: i32);

    /// Reset `rect` to transparent.
    fn clear(&self, rect: DestRect);
}

/// A [`Destination`] backed by an in-memory [`Pixmap`].
///
/// Blits composite source-over, so transparent surface pixels keep what is
/// already there. Writes that fall partly outside the pixmap are clipped.
pub struct PixmapDestination {
    pixmap: Mutex<Pixmap>,
}

impl PixmapDestination {
    /// Create a transparent destination. Returns `None` for a zero dimension.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Pixmap::new(width, height).map(Self::from_pixmap)
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            pixmap: Mutex::new(pixmap),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.lock().width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.lock().height()
    }

    /// The pixel at `(x, y)`, if inside the pixmap.
    pub fn pixel(&self, x: u32, y: u32) -> Option<PremultipliedColorU8> {
        self.pixmap.lock().pixel(x, y)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Pixmap {
        self.pixmap.lock().clone()
    }

    /// Run `f` with exclusive access to the pixmap.
    pub fn with_pixmap<R>(&self, f: impl FnOnce(&mut Pixmap) -> R) -> R {
        f(&mut self.pixmap.lock())
    }
}

impl Destination for PixmapDestination {
    fn blit(&self, surface: &Surface, src: PixelRect, dest_left: i32, dest_top: i32) {
        let Some(rect) = IntRect::from_xywh(src.left as i32, src.top as i32, src.width, src.height)
        else {
            return;
        };
        let Some(patch) = surface.pixmap().clone_rect(rect) else {
            return;
        };
        self.pixmap.lock().draw_pixmap(
            dest_left,
            dest_top,
            patch.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    fn clear(&self, rect: DestRect) {
        let mut target = self.pixmap.lock();
        let w = target.width() as i64;
        let h = target.height() as i64;
        let x0 = (rect.left as i64).max(0);
        let x1 = (rect.left as i64 + rect.width as i64).min(w);
        let y0 = (rect.top as i64).max(0);
        let y1 = (rect.top as i64 + rect.height as i64).min(h);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let pixels = target.pixels_mut();
        for y in y0..y1 {
            let start = (y * w + x0) as usize;
            let end = (y * w + x1) as usize;
            pixels[start..end].fill(PremultipliedColorU8::TRANSPARENT);
        }
    }
}

impl std::fmt::Debug for PixmapDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pixmap = self.pixmap.lock();
        f.debug_struct("PixmapDestination")
            .field("width", &pixmap.width())
            .field("height", &pixmap.height())
            .finish()
    }
}
