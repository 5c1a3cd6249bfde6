use crate::heap::HandleTable;
use crate::memory::MemoryViews;

/// Per-instance marshalling state.
///
/// One of these lives next to every guest instance; nothing in the crate is
/// global, so independent instances never share handles or views.
#[derive(Default)]
pub struct GlueContext {
    pub heap: HandleTable,
    pub views: MemoryViews,
    /// Byte count written by the most recent string encode.
    pub vector_len: u32,
}

impl GlueContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the instance is live: drop view caches built against
    /// whatever buffer existed before instantiation.
    pub fn finalize(&mut self) {
        self.views.reset();
        self.vector_len = 0;
    }

    pub fn stats(&self) -> GlueStats {
        GlueStats {
            live_handles: self.heap.live(),
            heap_capacity: self.heap.capacity(),
            view_rebuilds: self.views.rebuilds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlueStats {
    pub live_handles: usize,
    pub heap_capacity: usize,
    pub view_rebuilds: u64,
}
