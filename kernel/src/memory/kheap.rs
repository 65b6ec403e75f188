//! The kernel heap.
//!
//! A page-granular bump allocator over `KERNEL_HEAP_START..KERNEL_HEAP_MAX`.
//! Every allocation is backed by frames as soon as it is made, and freed
//! blocks give their frames back but never their address space: the bump
//! pointer only grows.

use arrayvec::ArrayVec;
use log::{debug, warn};
use thiserror_no_std::Error;
use x86_64::{
    structures::paging::{
        FrameAllocator, FrameDeallocator, Page, PageTableFlags, PhysFrame, Size4KiB,
    },
    PhysAddr, VirtAddr,
};

use crate::{
    constants::memory::{KERNEL_HEAP_MAX, KERNEL_HEAP_MAX_BLOCKS, KERNEL_HEAP_START, PAGE_SIZE},
    memory::paging::PageTableManager,
};

const KERNEL_HEAP_FLAGS: PageTableFlags = PageTableFlags::PRESENT.union(PageTableFlags::WRITABLE);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KernelHeapError {
    #[error("kernel heap address space exhausted")]
    OutOfSpace,
    #[error("kernel heap block table is full")]
    TableFull,
    #[error("zero-sized kernel allocation")]
    ZeroSized,
    #[error("out of frames while backing the kernel heap")]
    OutOfMemory,
}

/// One live allocation. `size` is always a whole number of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlock {
    pub start: VirtAddr,
    pub size: u64,
}

impl HeapBlock {
    pub fn end(&self) -> VirtAddr {
        self.start + self.size
    }

    fn pages(&self) -> impl Iterator<Item = Page> {
        let first = Page::containing_address(self.start);
        (0..self.size / PAGE_SIZE).map(move |i| first + i)
    }
}

pub struct KernelHeap {
    /// In allocation order, which is also address order
    blocks: ArrayVec<HeapBlock, KERNEL_HEAP_MAX_BLOCKS>,
    start: VirtAddr,
    ceiling: VirtAddr,
    bump: VirtAddr,
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelHeap {
    pub const fn new() -> Self {
        Self::with_range(
            VirtAddr::new_truncate(KERNEL_HEAP_START),
            VirtAddr::new_truncate(KERNEL_HEAP_MAX),
        )
    }

    /// A heap over `start..ceiling`. Both must be page aligned.
    pub const fn with_range(start: VirtAddr, ceiling: VirtAddr) -> Self {
        KernelHeap {
            blocks: ArrayVec::new_const(),
            start,
            ceiling,
            bump: start,
        }
    }

    pub fn blocks(&self) -> &[HeapBlock] {
        &self.blocks
    }

    /// The first address never handed out
    pub fn bump(&self) -> VirtAddr {
        self.bump
    }

    /// Reserves `size` bytes, rounded up to pages, and backs them with frames.
    ///
    /// If a frame or page table runs out partway, the pages mapped so far stay
    /// mapped and the bump pointer does not move. The next allocation over the
    /// same range adopts those pages instead of mapping them again.
    pub fn allocate<M, A>(
        &mut self,
        size: usize,
        space: &mut M,
        frames: &mut A,
    ) -> Result<VirtAddr, KernelHeapError>
    where
        M: PageTableManager,
        A: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
    {
        if size == 0 {
            return Err(KernelHeapError::ZeroSized);
        }
        let pages = (size as u64).div_ceil(PAGE_SIZE);
        let left = self.ceiling - self.bump;
        if pages > left / PAGE_SIZE {
            warn!("kernel heap: {} pages requested, {:#x} bytes left", pages, left);
            return Err(KernelHeapError::OutOfSpace);
        }
        let rounded = pages * PAGE_SIZE;
        if self.blocks.is_full() {
            warn!("kernel heap: all {} blocks in use", KERNEL_HEAP_MAX_BLOCKS);
            return Err(KernelHeapError::TableFull);
        }

        let block = HeapBlock {
            start: self.bump,
            size: rounded,
        };
        for (mapped, page) in block.pages().enumerate() {
            if space.translate(page).is_some() {
                continue;
            }
            let result = match frames.allocate_frame() {
                Some(frame) => space
                    .map(page, frame, KERNEL_HEAP_FLAGS, frames)
                    .map_err(|_| unsafe { frames.deallocate_frame(frame) }),
                None => Err(()),
            };
            if result.is_err() {
                warn!(
                    "kernel heap: out of memory after {} of {} pages at {:?}, mapped pages are kept",
                    mapped,
                    rounded / PAGE_SIZE,
                    block.start
                );
                return Err(KernelHeapError::OutOfMemory);
            }
        }

        self.blocks.push(block);
        self.bump = block.end();
        debug!("kernel heap: {:#x} bytes at {:?}", rounded, block.start);
        Ok(block.start)
    }

    /// Unmaps the block starting at `addr` and returns its frames. Addresses
    /// outside the heap or not at the start of a live block are ignored.
    pub fn release<M, A>(&mut self, addr: VirtAddr, space: &mut M, frames: &mut A)
    where
        M: PageTableManager,
        A: FrameDeallocator<Size4KiB>,
    {
        if addr < self.start || addr >= self.ceiling {
            return;
        }
        let Some(index) = self.blocks.iter().position(|b| b.start == addr) else {
            return;
        };
        let block = self.blocks.remove(index);
        for page in block.pages() {
            if let Some(frame) = space.unmap(page) {
                unsafe { frames.deallocate_frame(frame) };
            }
        }
        debug!("kernel heap: released {:#x} bytes at {:?}", block.size, addr);
    }

    pub fn physical_address<M: PageTableManager>(
        &self,
        addr: VirtAddr,
        space: &M,
    ) -> Option<PhysAddr> {
        let frame = space.translate(Page::containing_address(addr))?;
        Some(frame.start_address() + addr.as_u64() % PAGE_SIZE)
    }

    /// Finds the heap address mapped to `phys`, looking no further than the
    /// end of the most recent block
    pub fn virtual_address<M: PageTableManager>(
        &self,
        phys: PhysAddr,
        space: &M,
    ) -> Option<VirtAddr> {
        let end = self.blocks.last()?.end();
        let target = PhysFrame::<Size4KiB>::containing_address(phys);
        let first = Page::<Size4KiB>::containing_address(self.start);
        let last = Page::containing_address(end - 1u64);

        Page::range_inclusive(first, last)
            .find(|&page| space.translate(page) == Some(target))
            .map(|page| page.start_address() + phys.as_u64() % PAGE_SIZE)
    }
}
