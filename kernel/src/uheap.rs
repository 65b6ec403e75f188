//! The user heap allocator.
//!
//! Runs in the process and keeps only virtual-address bookkeeping: the heap's
//! pages are split into runs, each described at its first page by a signed
//! length (positive free, negative allocated) and the start of the run before
//! it. Backing the runs with memory is left to the kernel, reached through
//! [`HeapSyscalls`].

use alloc::{vec, vec::Vec};
use log::{trace, warn};
use x86_64::VirtAddr;

use crate::{
    config::PlacementStrategy,
    constants::memory::{PAGE_SIZE, USER_HEAP_PAGES, USER_HEAP_START},
    syscalls::SyscallError,
};

/// The kernel services the heap depends on.
pub trait HeapSyscalls {
    fn allocate_mem(&mut self, addr: VirtAddr, size: u64) -> Result<(), SyscallError>;
    fn free_mem(&mut self, addr: VirtAddr, size: u64) -> Result<(), SyscallError>;
    fn move_mem(&mut self, src: VirtAddr, dst: VirtAddr, size: u64) -> Result<(), SyscallError>;
    fn is_next_fit(&mut self) -> bool;
    fn is_best_fit(&mut self) -> bool;
}

/// Bookkeeping kept at the first page of a run. Pages inside a run hold the
/// default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Extent {
    run: isize,
    prev: Option<usize>,
}

pub struct UserHeap {
    base: VirtAddr,
    extents: Vec<Extent>,
    /// Where the next next-fit search starts
    cursor: usize,
}

impl Default for UserHeap {
    fn default() -> Self {
        Self::new(VirtAddr::new(USER_HEAP_START), USER_HEAP_PAGES)
    }
}

impl UserHeap {
    /// A heap of `pages` free pages starting at `base`
    pub fn new(base: VirtAddr, pages: usize) -> Self {
        assert!(pages > 0 && pages <= isize::MAX as usize);
        let mut extents = vec![Extent::default(); pages];
        extents[0].run = pages as isize;
        UserHeap {
            base,
            extents,
            cursor: 0,
        }
    }

    pub fn pages(&self) -> usize {
        self.extents.len()
    }

    /// The signed run lengths in address order
    pub fn runs(&self) -> Vec<isize> {
        let mut runs = Vec::new();
        let mut index = 0;
        while index < self.pages() {
            let run = self.extents[index].run;
            runs.push(run);
            index += run.unsigned_abs();
        }
        runs
    }

    fn address_of(&self, index: usize) -> VirtAddr {
        self.base + index as u64 * PAGE_SIZE
    }

    /// Allocates with the strategy the kernel has selected
    pub fn malloc<S: HeapSyscalls>(&mut self, size: usize, sys: &mut S) -> Option<VirtAddr> {
        let strategy = if sys.is_best_fit() {
            PlacementStrategy::BestFit
        } else {
            PlacementStrategy::NextFit
        };
        self.allocate(size, strategy, sys)
    }

    pub fn allocate<S: HeapSyscalls>(
        &mut self,
        size: usize,
        strategy: PlacementStrategy,
        sys: &mut S,
    ) -> Option<VirtAddr> {
        if size == 0 {
            return None;
        }
        let pages = size.div_ceil(PAGE_SIZE as usize);
        if pages > self.pages() {
            return None;
        }

        let start = match strategy {
            PlacementStrategy::NextFit => self.next_fit(pages),
            PlacementStrategy::BestFit => self.best_fit(pages),
        }?;
        let cursor = self.cursor;
        self.take(start, pages);

        let addr = self.address_of(start);
        if let Err(err) = sys.allocate_mem(addr, (pages as u64) * PAGE_SIZE) {
            warn!("user heap: kernel refused {} pages at {:?}: {}", pages, addr, err);
            self.release(start);
            self.cursor = cursor;
            return None;
        }
        trace!("user heap: {} pages at {:?}", pages, addr);
        Some(addr)
    }

    /// Frees the run starting at `addr`. Anything that is not the start of an
    /// allocated run is ignored, and a run the kernel refuses to release stays
    /// allocated.
    pub fn free<S: HeapSyscalls>(&mut self, addr: VirtAddr, sys: &mut S) {
        if addr < self.base || (addr - self.base) % PAGE_SIZE != 0 {
            return;
        }
        let index = ((addr - self.base) / PAGE_SIZE) as usize;
        if index >= self.pages() || self.extents[index].run >= 0 {
            return;
        }

        let pages = self.extents[index].run.unsigned_abs();
        if let Err(err) = sys.free_mem(self.address_of(index), (pages as u64) * PAGE_SIZE) {
            warn!("user heap: kernel failed to free {} pages: {}", pages, err);
            return;
        }
        self.release(index);
    }

    /// The start of the run holding page `index`
    fn run_containing(&self, index: usize) -> usize {
        let mut start = 0;
        loop {
            let end = start + self.extents[start].run.unsigned_abs();
            if index < end {
                return start;
            }
            start = end;
        }
    }

    fn next_fit(&self, pages: usize) -> Option<usize> {
        let total = self.pages();
        let mut index = self.run_containing(self.cursor % total);
        let mut scanned = 0;
        while scanned < total {
            let run = self.extents[index].run;
            if run >= pages as isize {
                return Some(index);
            }
            let len = run.unsigned_abs();
            scanned += len;
            index = (index + len) % total;
        }
        None
    }

    fn best_fit(&self, pages: usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut index = 0;
        while index < self.pages() {
            let run = self.extents[index].run;
            if run == pages as isize {
                return Some(index);
            }
            if run > pages as isize && best.map_or(true, |b| run < self.extents[b].run) {
                best = Some(index);
            }
            index += run.unsigned_abs();
        }
        best
    }

    /// Marks the first `pages` pages of the free run at `start` allocated,
    /// splitting off the rest as a new free run
    fn take(&mut self, start: usize, pages: usize) {
        let run = self.extents[start].run as usize;
        if run > pages {
            let tail = start + pages;
            self.extents[tail] = Extent {
                run: (run - pages) as isize,
                prev: Some(start),
            };
            if let Some(next) = self.extents.get_mut(start + run) {
                next.prev = Some(tail);
            }
        }
        self.extents[start].run = -(pages as isize);
        self.cursor = (start + pages) % self.pages();
    }

    /// Turns the allocated run at `index` free and merges it with free
    /// neighbours
    fn release(&mut self, index: usize) {
        let len = self.extents[index].run.unsigned_abs();
        let prev = self.extents[index]
            .prev
            .filter(|&p| self.extents[p].run > 0);
        let next = Some(index + len).filter(|&n| n < self.pages() && self.extents[n].run > 0);

        let (start, mut merged) = match prev {
            Some(p) => {
                self.extents[index] = Extent::default();
                (p, self.extents[p].run.unsigned_abs() + len)
            }
            None => (index, len),
        };
        if let Some(n) = next {
            merged += self.extents[n].run.unsigned_abs();
            self.extents[n] = Extent::default();
        }
        self.extents[start].run = merged as isize;

        if let Some(after) = self.extents.get_mut(start + merged) {
            after.prev = Some(start);
        }
    }
}
