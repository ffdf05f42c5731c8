//! The bounded working surface and its lease.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use tiny_skia::{Color, Pixmap};

/// Rectangle inside a [`Surface`], in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Square RGBA surface the [`Renderer`](super::Renderer) paints one block into.
pub struct Surface {
    pixmap: Pixmap,
}

impl Surface {
    /// Allocate a transparent `size × size` surface. Returns `None` for size zero.
    pub fn new(size: u32) -> Option<Self> {
        Pixmap::new(size, size).map(|pixmap| Self { pixmap })
    }

    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Reset every pixel to transparent.
    pub fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("size", &self.size()).finish()
    }
}

/// Holder of the single reusable surface.
pub(crate) struct SurfaceSlot {
    size: u32,
    slot: Mutex<Option<Surface>>,
}

impl SurfaceSlot {
    pub(crate) fn new(size: u32) -> Self {
        Self {
            size,
            slot: Mutex::new(Surface::new(size)),
        }
    }

    /// Take the surface out of the slot, allocating one if it is in use.
    pub(crate) fn lease(&self) -> Option<SurfaceLease<'_>> {
        let surface = self.slot.lock().take().or_else(|| Surface::new(self.size))?;
        Some(SurfaceLease {
            slot: self,
            surface: Some(surface),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_available(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Exclusive use of the working surface; puts it back on drop.
pub(crate) struct SurfaceLease<'a> {
    slot: &'a SurfaceSlot,
    surface: Option<Surface>,
}

impl Deref for SurfaceLease<'_> {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        // Only emptied in drop.
        match &self.surface {
            Some(surface) => surface,
            None => unreachable!("surface lease used after drop"),
        }
    }
}

impl DerefMut for SurfaceLease<'_> {
    fn deref_mut(&mut self) -> &mut Surface {
        match &mut self.surface {
            Some(surface) => surface,
            None => unreachable!("surface lease used after drop"),
        }
    }
}

impl Drop for SurfaceLease<'_> {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            let mut slot = self.slot.slot.lock();
            if slot.is_none() {
                *slot = Some(surface);
            }
        }
    }
}
