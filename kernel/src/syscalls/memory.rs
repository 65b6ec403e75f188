//! Kernel side of the user heap's memory syscalls.
//!
//! The user heap only does address bookkeeping. These calls tie its ranges
//! to the page file: allocated pages get a slot up front so the fault path
//! can bring them in later, and freed pages are dropped everywhere.

use alloc::vec::Vec;
use log::{debug, warn};
use thiserror_no_std::Error;
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, Page, Size4KiB},
    VirtAddr,
};

use crate::{
    constants::memory::PAGE_SIZE,
    memory::{pagefile::PageFileStore, paging::PageTableManager},
    processes::Process,
    vm::MemoryManager,
};

/// First address of the kernel half
const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    #[error("the page file cannot hold the range")]
    NoSpace,
    #[error("the range is empty or leaves user space")]
    InvalidRange,
    #[error("operation not supported")]
    Unsupported,
}

/// The pages covering `addr..addr + size`
fn user_pages(addr: VirtAddr, size: u64) -> Result<impl Iterator<Item = Page>, SyscallError> {
    let end = addr
        .as_u64()
        .checked_add(size)
        .filter(|&end| size > 0 && end <= USER_SPACE_END)
        .ok_or(SyscallError::InvalidRange)?;
    let first = addr.as_u64() / PAGE_SIZE;
    let last = end.div_ceil(PAGE_SIZE);
    Ok((first..last).map(|n| Page::containing_address(VirtAddr::new(n * PAGE_SIZE))))
}

impl<F, P> MemoryManager<F, P>
where
    F: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
    P: PageFileStore,
{
    /// Reserves a page-file slot for every page of the range. On failure the
    /// slots taken by this call are given back.
    pub fn sys_allocate_mem(
        &mut self,
        process: &Process,
        addr: VirtAddr,
        size: u64,
    ) -> Result<(), SyscallError> {
        let mut reserved = Vec::new();
        for page in user_pages(addr, size)? {
            if self.page_file.exists(process.pid, page) {
                continue;
            }
            if self.page_file.reserve_slot(process.pid, page).is_err() {
                warn!(
                    "pid {}: page file full, rolling back {} pages",
                    process.pid,
                    reserved.len()
                );
                for page in reserved {
                    self.page_file.remove(process.pid, page);
                }
                return Err(SyscallError::NoSpace);
            }
            reserved.push(page);
        }
        debug!("pid {}: backed {:#x} bytes at {:?}", process.pid, size, addr);
        Ok(())
    }

    /// Discards every page of the range: its slot, its working-set entry and
    /// its mapping. Nothing is written back.
    pub fn sys_free_mem<M: PageTableManager>(
        &mut self,
        process: &mut Process,
        space: &mut M,
        addr: VirtAddr,
        size: u64,
    ) -> Result<(), SyscallError> {
        for page in user_pages(addr, size)? {
            self.page_file.remove(process.pid, page);
            if let Some(index) = process.working_set.find(page) {
                process.working_set.clear(index);
            }
            if let Some(frame) = space.unmap(page) {
                unsafe { self.frames.deallocate_frame(frame) };
            }
        }
        debug!("pid {}: released {:#x} bytes at {:?}", process.pid, size, addr);
        Ok(())
    }

    pub fn sys_move_mem(
        &mut self,
        _process: &mut Process,
        _src: VirtAddr,
        _dst: VirtAddr,
        _size: u64,
    ) -> Result<(), SyscallError> {
        Err(SyscallError::Unsupported)
    }
}
