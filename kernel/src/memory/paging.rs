//! Page-table management for one address space.
//!
//! [`PageTableManager`] is the interface the allocators and the fault path
//! program against. [`OffsetAddressSpace`] implements it over four-level
//! x86_64 tables reached through the direct map of physical memory.

use thiserror_no_std::Error;
use x86_64::structures::paging::{
    page_table::{FrameError, PageTableEntry},
    FrameAllocator, Page, PageTable, PageTableFlags, PhysFrame, Size4KiB,
};

use crate::memory::{phys::PhysWindow, tlb::Tlb};

/// Flags for intermediate tables; the leaf entry decides the real permissions
const TABLE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

/// First level-4 index of the kernel half
const KERNEL_HALF_START: usize = 256;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    #[error("no frame left for a page table")]
    OutOfMemory,
    #[error("page {0:?} is already mapped")]
    AlreadyMapped(Page),
}

/// Mapping primitives of a single address space.
///
/// Every operation that changes an entry also invalidates the cached
/// translation of that page.
pub trait PageTableManager {
    /// Maps `page` to `frame`, creating missing page tables with frames from
    /// `frames`
    fn map<A>(
        &mut self,
        page: Page,
        frame: PhysFrame,
        flags: PageTableFlags,
        frames: &mut A,
    ) -> Result<(), MapError>
    where
        A: FrameAllocator<Size4KiB>;

    /// Removes the mapping of `page` and returns the frame it pointed to. The
    /// frame is not freed.
    fn unmap(&mut self, page: Page) -> Option<PhysFrame>;

    /// The frame `page` is mapped to
    fn translate(&self, page: Page) -> Option<PhysFrame>;

    /// Permission and status bits of a mapped page
    fn flags(&self, page: Page) -> Option<PageTableFlags>;

    /// Sets `set` and then clears `clear` on a mapped page. Returns false if
    /// the page is not mapped.
    fn update_flags(&mut self, page: Page, set: PageTableFlags, clear: PageTableFlags) -> bool;

    /// Whether the table holding the leaf entry of `page` exists
    fn has_table(&self, page: Page) -> bool;

    /// Creates the tables needed to hold a leaf entry for `page`
    fn ensure_table<A>(&mut self, page: Page, frames: &mut A) -> Result<(), MapError>
    where
        A: FrameAllocator<Size4KiB>;
}

/// An address space rooted at a level-4 table in physical memory.
pub struct OffsetAddressSpace<T: Tlb> {
    pml4: PhysFrame,
    phys: PhysWindow,
    tlb: T,
}

impl<T: Tlb> OffsetAddressSpace<T> {
    /// Wraps an existing level-4 table.
    ///
    /// # Safety
    ///
    /// `pml4` must hold a valid level-4 table reachable through `phys`, and no
    /// other code may modify the tables while this value exists.
    pub unsafe fn new(pml4: PhysFrame, phys: PhysWindow, tlb: T) -> Self {
        OffsetAddressSpace { pml4, phys, tlb }
    }

    /// Builds an empty address space on a freshly allocated level-4 table
    pub fn create<A>(phys: PhysWindow, frames: &mut A, tlb: T) -> Result<Self, MapError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let pml4 = frames.allocate_frame().ok_or(MapError::OutOfMemory)?;
        // Need to zero out new page table
        unsafe { (*phys.table_ptr(pml4)).zero() };
        Ok(OffsetAddressSpace { pml4, phys, tlb })
    }

    /// Copies the higher-half entries of `kernel` so kernel mappings, the
    /// kernel heap included, are visible in this address space
    pub fn share_kernel_half<U: Tlb>(&mut self, kernel: &OffsetAddressSpace<U>) {
        let kernel_pml4 = kernel.table(kernel.pml4).clone();
        let pml4 = self.pml4;
        let table = self.table_mut(pml4);
        for i in KERNEL_HALF_START..512 {
            table[i] = kernel_pml4[i].clone();
        }
    }

    pub fn pml4_frame(&self) -> PhysFrame {
        self.pml4
    }

    pub fn tlb(&self) -> &T {
        &self.tlb
    }

    fn table(&self, frame: PhysFrame) -> &PageTable {
        unsafe { &*self.phys.table_ptr(frame) }
    }

    fn table_mut(&mut self, frame: PhysFrame) -> &mut PageTable {
        unsafe { &mut *self.phys.table_ptr(frame) }
    }

    /// Walks levels 4 to 2 and returns the frame of the level-1 table
    fn leaf_table(&self, page: Page) -> Option<PhysFrame> {
        let mut frame = self.pml4;
        for index in [page.p4_index(), page.p3_index(), page.p2_index()] {
            frame = self.table(frame)[index].frame().ok()?;
        }
        Some(frame)
    }

    fn create_leaf_table<A>(&mut self, page: Page, frames: &mut A) -> Result<PhysFrame, MapError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let mut frame = self.pml4;
        for index in [page.p4_index(), page.p3_index(), page.p2_index()] {
            let next = self.table(frame)[index].frame();
            frame = match next {
                Ok(next) => next,
                Err(FrameError::HugeFrame) => return Err(MapError::AlreadyMapped(page)),
                Err(_) => {
                    let table = frames.allocate_frame().ok_or(MapError::OutOfMemory)?;
                    self.table_mut(table).zero();
                    self.table_mut(frame)[index].set_frame(table, TABLE_FLAGS);
                    table
                }
            };
        }
        Ok(frame)
    }

    fn leaf_entry(&self, page: Page) -> Option<&PageTableEntry> {
        let table = self.leaf_table(page)?;
        let entry = &self.table(table)[page.p1_index()];
        entry
            .flags()
            .contains(PageTableFlags::PRESENT)
            .then_some(entry)
    }
}

impl<T: Tlb> PageTableManager for OffsetAddressSpace<T> {
    fn map<A>(
        &mut self,
        page: Page,
        frame: PhysFrame,
        flags: PageTableFlags,
        frames: &mut A,
    ) -> Result<(), MapError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        let table = self.create_leaf_table(page, frames)?;
        let entry = &mut self.table_mut(table)[page.p1_index()];
        if entry.flags().contains(PageTableFlags::PRESENT) {
            return Err(MapError::AlreadyMapped(page));
        }
        entry.set_frame(frame, flags);
        self.tlb.invalidate(page);
        Ok(())
    }

    fn unmap(&mut self, page: Page) -> Option<PhysFrame> {
        let table = self.leaf_table(page)?;
        let entry = &mut self.table_mut(table)[page.p1_index()];
        let frame = entry.frame().ok()?;
        entry.set_unused();
        self.tlb.invalidate(page);
        Some(frame)
    }

    fn translate(&self, page: Page) -> Option<PhysFrame> {
        self.leaf_entry(page)?.frame().ok()
    }

    fn flags(&self, page: Page) -> Option<PageTableFlags> {
        self.leaf_entry(page).map(PageTableEntry::flags)
    }

    fn update_flags(&mut self, page: Page, set: PageTableFlags, clear: PageTableFlags) -> bool {
        let Some(table) = self.leaf_table(page) else {
            return false;
        };
        let entry = &mut self.table_mut(table)[page.p1_index()];
        let flags = entry.flags();
        if !flags.contains(PageTableFlags::PRESENT) {
            return false;
        }
        entry.set_flags((flags | set) - clear);
        self.tlb.invalidate(page);
        true
    }

    fn has_table(&self, page: Page) -> bool {
        self.leaf_table(page).is_some()
    }

    fn ensure_table<A>(&mut self, page: Page, frames: &mut A) -> Result<(), MapError>
    where
        A: FrameAllocator<Size4KiB>,
    {
        self.create_leaf_table(page, frames).map(|_| ())
    }
}
