//! Global physical-frame allocator for eagerly loaded address spaces.

use std::sync::Mutex;

use oxidos_machine::NUM_PHYS_PAGES;

use crate::fs::bitmap::Bitmap;
use crate::util::lock;

pub struct FrameAllocator {
    map: Mutex<Bitmap>,
}

impl FrameAllocator {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(Bitmap::new(NUM_PHYS_PAGES)),
        }
    }

    pub fn alloc(&self) -> Option<u32> {
        lock(&self.map).find()
    }

    pub fn free(&self, frame: u32) {
        lock(&self.map).clear(frame);
    }

    pub fn free_count(&self) -> usize {
        lock(&self.map).count_clear()
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}
