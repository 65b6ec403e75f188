//! Demand paging.
//!
//! A fault on a page whose leaf table is missing only builds the table. A
//! fault on an unmapped page places it in the working set, first evicting a
//! victim chosen by the replacement policy if the set is full. Dirty victims
//! are written to the page file before they are unmapped.

use log::{debug, error, trace};
use thiserror_no_std::Error;
use x86_64::{
    structures::paging::{
        FrameAllocator, FrameDeallocator, Page, PageTableFlags, PhysFrame, Size4KiB,
    },
    VirtAddr,
};

use crate::{
    config::ReplacementPolicy,
    memory::{
        pagefile::PageFileStore,
        paging::{MapError, PageTableManager},
    },
    processes::{Pid, Process},
    vm::{replacement, MemoryManager},
};

const USER_PAGE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER_ACCESSIBLE);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    #[error("page file exhausted while backing {0:?}")]
    SwapExhausted(Page),
    #[error("{0:?} has no page file slot and is not a stack page")]
    MissingBacking(Page),
    #[error("no frame left for {0:?}")]
    OutOfFrames(Page),
    #[error("mapping {0:?} failed: {1}")]
    MapFailed(Page, MapError),
    #[error("{0:?} is already resident")]
    AlreadyResident(Page),
}

impl FaultError {
    /// Whether the kernel can continue after this error. A fault on a
    /// resident page is a protection problem for the process manager to
    /// deal with; everything else means memory state may be lost.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FaultError::AlreadyResident(_))
    }
}

/// What a successfully handled fault did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Built the missing page table; the access will fault again on the page
    Table,
    /// Placed the page in a free working-set slot
    Placement,
    /// Evicted `victim` to make room for the page
    Replacement { victim: Page },
}

impl<F, P> MemoryManager<F, P>
where
    F: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
    P: PageFileStore,
{
    /// Handles a fault of `process` at `addr` in `space`.
    pub fn handle_fault<M: PageTableManager>(
        &mut self,
        process: &mut Process,
        space: &mut M,
        addr: VirtAddr,
    ) -> Result<FaultKind, FaultError> {
        let page = Page::containing_address(addr);

        if self.config().replacement == ReplacementPolicy::Lru {
            replacement::age(&mut process.working_set, space);
        }

        if !space.has_table(page) {
            process.table_faults += 1;
            trace!("pid {}: table fault at {:?}", process.pid, addr);
            space
                .ensure_table(page, &mut self.frames)
                .map_err(|err| match err {
                    MapError::OutOfMemory => FaultError::OutOfFrames(page),
                    err => FaultError::MapFailed(page, err),
                })?;
            return Ok(FaultKind::Table);
        }

        if space.translate(page).is_some() {
            return Err(FaultError::AlreadyResident(page));
        }

        process.page_faults += 1;
        trace!("pid {}: page fault at {:?}", process.pid, addr);

        let mut evicted = None;
        if process.working_set.is_full() {
            let policy = self.config().replacement;
            let victim = replacement::select_victim(policy, &mut process.working_set, space);
            if let Some(index) = victim {
                evicted = self.remove_page(process, space, index)?;
                process.working_set.set_cursor(index);
            }
        }
        self.place(process, space, page)?;

        Ok(match evicted {
            Some(victim) => FaultKind::Replacement { victim },
            None => FaultKind::Placement,
        })
    }

    /// The fault boundary. Halts the kernel on a fatal error and hands
    /// anything else back to the caller.
    pub fn dispatch_fault<M: PageTableManager>(
        &mut self,
        process: &mut Process,
        space: &mut M,
        addr: VirtAddr,
    ) -> Result<FaultKind, FaultError> {
        match self.handle_fault(process, space, addr) {
            Err(err) if err.is_fatal() => {
                error!("pid {}: unrecoverable fault at {:?}: {}", process.pid, addr, err);
                panic!("unrecoverable page fault: {}", err);
            }
            result => result,
        }
    }

    /// Backs `page` with a fresh frame, fills it from the page file and
    /// records it in the working set
    fn place<M: PageTableManager>(
        &mut self,
        process: &mut Process,
        space: &mut M,
        page: Page,
    ) -> Result<(), FaultError> {
        let frame = self
            .frames
            .allocate_frame()
            .ok_or(FaultError::OutOfFrames(page))?;
        if let Err(err) = space.map(page, frame, USER_PAGE_FLAGS, &mut self.frames) {
            unsafe { self.frames.deallocate_frame(frame) };
            return Err(FaultError::MapFailed(page, err));
        }

        if !self.page_file.exists(process.pid, page) {
            if !process.in_stack(page.start_address()) {
                return Err(FaultError::MissingBacking(page));
            }
            // first touch of a stack page
            self.page_file
                .reserve_slot(process.pid, page)
                .map_err(|_| FaultError::SwapExhausted(page))?;
        }
        self.page_file
            .read_into(process.pid, page, frame)
            .map_err(|_| FaultError::MissingBacking(page))?;

        let slot = process.working_set.place(page);
        debug_assert!(slot.is_some(), "placement into a full working set");
        debug!("pid {}: placed {:?} in slot {:?}", process.pid, page, slot);
        Ok(())
    }

    /// Evicts working-set slot `index`, writing the page back first if it is
    /// dirty. Returns the evicted page.
    fn remove_page<M: PageTableManager>(
        &mut self,
        process: &mut Process,
        space: &mut M,
        index: usize,
    ) -> Result<Option<Page>, FaultError> {
        let Some(page) = process.working_set.entry(index).page else {
            return Ok(None);
        };

        let dirty = space
            .flags(page)
            .is_some_and(|flags| flags.contains(PageTableFlags::DIRTY));
        if dirty {
            if let Some(frame) = space.translate(page) {
                self.write_back(process.pid, page, frame)?;
            }
        }

        if let Some(frame) = space.unmap(page) {
            unsafe { self.frames.deallocate_frame(frame) };
        }
        process.working_set.clear(index);
        debug!("pid {}: evicted {:?} from slot {}", process.pid, page, index);
        Ok(Some(page))
    }

    fn write_back(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), FaultError> {
        if !self.page_file.exists(pid, page) {
            self.page_file
                .reserve_slot(pid, page)
                .map_err(|_| FaultError::SwapExhausted(page))?;
        }
        trace!("pid {}: writing back {:?}", pid, page);
        self.page_file
            .write_back(pid, page, frame)
            .map_err(|_| FaultError::SwapExhausted(page))
    }
}
