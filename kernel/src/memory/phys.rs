//! Access to physical memory through the higher-half direct map.

use x86_64::{
    structures::paging::{PageTable, PhysFrame},
    PhysAddr, VirtAddr,
};

use crate::constants::memory::FRAME_SIZE;

/// All of physical memory mapped at a fixed virtual offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysWindow {
    offset: VirtAddr,
}

impl PhysWindow {
    /// # Safety
    ///
    /// Every physical frame handed to this window must be mapped, readable and
    /// writable at `offset + frame.start_address()`.
    pub const unsafe fn new(offset: VirtAddr) -> Self {
        PhysWindow { offset }
    }

    pub fn offset(&self) -> VirtAddr {
        self.offset
    }

    pub fn virt(&self, addr: PhysAddr) -> VirtAddr {
        self.offset + addr.as_u64()
    }

    pub fn table_ptr(&self, frame: PhysFrame) -> *mut PageTable {
        self.virt(frame.start_address()).as_mut_ptr()
    }

    /// The contents of `frame`
    ///
    /// # Safety
    ///
    /// The caller must not hold any other reference to the same frame.
    pub unsafe fn frame_bytes<'a>(&self, frame: PhysFrame) -> &'a mut [u8; FRAME_SIZE] {
        &mut *self.virt(frame.start_address()).as_mut_ptr::<[u8; FRAME_SIZE]>()
    }
}
