use crate::constants::memory::{BITMAP_ENTRY_SIZE, FRAME_SIZE, FULL_BITMAP_ENTRY};
use alloc::{boxed::Box, vec};
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr,
};

/// Frame allocator over one contiguous range of physical memory.
///
/// One bit per frame, set while the frame is in use. Allocation resumes the
/// scan where the previous one stopped.
pub struct BitmapFrameAllocator {
    base: PhysAddr,
    total_frames: usize,
    free_frames: usize,
    to_allocate: usize,
    bitmap: Box<[u64]>,
}

impl BitmapFrameAllocator {
    /// Manages `frame_count` frames starting at `first`, all initially free
    pub fn new(first: PhysFrame, frame_count: usize) -> Self {
        let bitmap_size = frame_count.div_ceil(BITMAP_ENTRY_SIZE);

        // bits past the end of the range stay set so they are never handed out
        let mut allocator = Self {
            base: first.start_address(),
            total_frames: frame_count,
            free_frames: 0,
            to_allocate: 0,
            bitmap: vec![FULL_BITMAP_ENTRY; bitmap_size].into_boxed_slice(),
        };
        for frame_index in 0..frame_count {
            allocator.clear_bit(frame_index);
        }
        allocator
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    /// Check if frame is used. input: PhysFrame, output: bool
    pub fn is_frame_used(&self, frame: PhysFrame) -> bool {
        self.is_bit_set(self.frame_index(frame))
    }

    /// Take `frame` out of circulation, e.g. because it holds a page table
    /// that was set up before the allocator existed
    pub fn mark_frame_used(&mut self, frame: PhysFrame) {
        let frame_index = self.frame_index(frame);
        if !self.is_bit_set(frame_index) {
            self.set_bit(frame_index);
        }
    }

    fn frame_index(&self, frame: PhysFrame) -> usize {
        let offset = frame.start_address().as_u64() - self.base.as_u64();
        offset as usize / FRAME_SIZE
    }

    /// set a particular bit (1), taking in frame_index (usize)
    fn set_bit(&mut self, frame_index: usize) {
        assert!(frame_index < self.total_frames);

        let byte_index = frame_index / 64;
        let bit_index = frame_index % 64;

        let mask = 1 << bit_index;
        self.bitmap[byte_index] |= mask;
        self.free_frames -= 1;
    }

    /// clear a particular bit (0), taking in frame_index (usize)
    fn clear_bit(&mut self, frame_index: usize) {
        assert!(frame_index < self.total_frames);

        let byte_index = frame_index / 64;
        let bit_index = frame_index % 64;

        let mask = 1 << bit_index;
        self.bitmap[byte_index] &= !mask;
        self.free_frames += 1;
    }

    /// check if bit is set at frame_index. returns true if bit == 1, false otherwise
    fn is_bit_set(&self, frame_index: usize) -> bool {
        assert!(frame_index < self.total_frames);

        let byte_index = frame_index / 64;
        let bit_index = frame_index % 64;

        let mask = 1 << bit_index;
        (self.bitmap[byte_index] & mask) != 0
    }
}

unsafe impl FrameAllocator<Size4KiB> for BitmapFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        if self.free_frames == 0 {
            return None;
        }
        loop {
            if !self.is_bit_set(self.to_allocate) {
                self.set_bit(self.to_allocate);
                let addr = self.base.as_u64() + (self.to_allocate * FRAME_SIZE) as u64;
                self.to_allocate = (self.to_allocate + 1) % self.total_frames;
                return Some(PhysFrame::containing_address(PhysAddr::new(addr)));
            }

            self.to_allocate = (self.to_allocate + 1) % self.total_frames;
        }
    }
}

impl FrameDeallocator<Size4KiB> for BitmapFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        let frame_index = self.frame_index(frame);
        if self.is_bit_set(frame_index) {
            self.clear_bit(frame_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn frame(index: u64) -> PhysFrame {
        PhysFrame::containing_address(PhysAddr::new(0x10_0000 + index * 4096))
    }

    #[test]
    fn test_allocates_every_frame_once() {
        let mut allocator = BitmapFrameAllocator::new(frame(0), 70);
        let frames: Vec<PhysFrame> = core::iter::from_fn(|| allocator.allocate_frame()).collect();

        assert_eq!(frames.len(), 70);
        assert_eq!(frames[0], frame(0));
        assert_eq!(frames[69], frame(69));
        assert_eq!(allocator.free_frames(), 0);
        assert!(allocator.allocate_frame().is_none());
    }

    #[test]
    fn test_deallocated_frame_is_reused() {
        let mut allocator = BitmapFrameAllocator::new(frame(0), 4);
        for _ in 0..4 {
            allocator.allocate_frame().unwrap();
        }
        unsafe { allocator.deallocate_frame(frame(2)) };

        assert!(!allocator.is_frame_used(frame(2)));
        assert_eq!(allocator.allocate_frame(), Some(frame(2)));
    }

    #[test]
    fn test_marked_frames_are_skipped() {
        let mut allocator = BitmapFrameAllocator::new(frame(0), 3);
        allocator.mark_frame_used(frame(0));
        allocator.mark_frame_used(frame(0));

        assert_eq!(allocator.free_frames(), 2);
        assert_eq!(allocator.allocate_frame(), Some(frame(1)));
    }
}
