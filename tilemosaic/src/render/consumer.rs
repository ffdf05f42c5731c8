//! Render consumers and their one-shot completion callbacks.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use super::RenderError;
use crate::compositor::{CompositeTarget, Destination};
use crate::request::DrawSpec;

/// Completion callback of one `render_tiles` call.
pub type OnDone = Box<dyn FnOnce(Result<(), RenderError>) + Send + 'static>;

/// One caller waiting on a render.
///
/// The callback sits behind a reentrant lock so a callback may release its
/// own render, and so a release on another thread waits for an in-progress
/// callback before returning.
pub(crate) struct Consumer {
    id: u64,
    destination: Arc<dyn Destination>,
    draw_specs: Vec<DrawSpec>,
    on_done: ReentrantMutex<RefCell<Option<OnDone>>>,
}

impl Consumer {
    pub(crate) fn new(
        id: u64,
        destination: Arc<dyn Destination>,
        draw_specs: Vec<DrawSpec>,
        on_done: OnDone,
    ) -> Self {
        Self {
            id,
            destination,
            draw_specs,
            on_done: ReentrantMutex::new(RefCell::new(Some(on_done))),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn target(&self) -> CompositeTarget<'_> {
        CompositeTarget {
            destination: self.destination.as_ref(),
            draw_specs: &self.draw_specs,
        }
    }

    /// Fire the callback if it has not fired yet. Returns whether it fired.
    pub(crate) fn notify(&self, outcome: Result<(), RenderError>) -> bool {
        let guard = self.on_done.lock();
        let callback = guard.borrow_mut().take();
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.on_done.lock().borrow().is_none()
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("draw_specs", &self.draw_specs.len())
            .field("fired", &self.has_fired())
            .finish()
    }
}
