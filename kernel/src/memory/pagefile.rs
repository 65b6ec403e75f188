//! Backing store for pages that are not resident.
//!
//! Slots are keyed by (process, virtual page). The fault path writes dirty
//! victims back here and reads pages in again when they are faulted on.

use alloc::{boxed::Box, collections::BTreeMap, vec, vec::Vec};
use log::trace;
use thiserror_no_std::Error;
use x86_64::structures::paging::{Page, PhysFrame};

use crate::{constants::memory::FRAME_SIZE, memory::phys::PhysWindow, processes::Pid};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PageFileError {
    #[error("the page file has no free slot")]
    NoSpace,
    #[error("no slot is reserved for this page")]
    SlotMissing,
}

pub trait PageFileStore {
    /// Whether a slot is reserved for `page` of process `pid`
    fn exists(&self, pid: Pid, page: Page) -> bool;

    /// Reserves a zero-filled slot for `page`. Reserving a page that already
    /// has a slot keeps the slot and its contents.
    fn reserve_slot(&mut self, pid: Pid, page: Page) -> Result<(), PageFileError>;

    /// Copies the contents of `frame` into the slot of `page`
    fn write_back(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError>;

    /// Copies the slot of `page` into `frame`
    fn read_into(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError>;

    /// Releases the slot of `page`. Returns false if there was none.
    fn remove(&mut self, pid: Pid, page: Page) -> bool;

    fn free_slots(&self) -> usize;
}

/// A fixed number of page images kept in kernel memory.
///
/// Released slots are recycled before new ones are handed out.
pub struct RamPageFile {
    phys: PhysWindow,
    capacity: usize,
    images: Vec<Box<[u8]>>,
    recycled: Vec<usize>,
    map: BTreeMap<(Pid, Page), usize>,
}

impl RamPageFile {
    pub fn new(phys: PhysWindow, capacity: usize) -> Self {
        RamPageFile {
            phys,
            capacity,
            images: Vec::new(),
            recycled: Vec::new(),
            map: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn take_slot(&mut self) -> Option<usize> {
        if let Some(slot) = self.recycled.pop() {
            self.images[slot].fill(0);
            Some(slot)
        } else if self.images.len() < self.capacity {
            self.images.push(vec![0u8; FRAME_SIZE].into_boxed_slice());
            Some(self.images.len() - 1)
        } else {
            None
        }
    }
}

impl PageFileStore for RamPageFile {
    fn exists(&self, pid: Pid, page: Page) -> bool {
        self.map.contains_key(&(pid, page))
    }

    fn reserve_slot(&mut self, pid: Pid, page: Page) -> Result<(), PageFileError> {
        if self.exists(pid, page) {
            return Ok(());
        }
        let slot = self.take_slot().ok_or(PageFileError::NoSpace)?;
        trace!("page file: slot {} reserved for pid {} {:?}", slot, pid, page);
        self.map.insert((pid, page), slot);
        Ok(())
    }

    fn write_back(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError> {
        let slot = *self
            .map
            .get(&(pid, page))
            .ok_or(PageFileError::SlotMissing)?;
        let contents = unsafe { self.phys.frame_bytes(frame) };
        self.images[slot].copy_from_slice(&contents[..]);
        Ok(())
    }

    fn read_into(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError> {
        let slot = *self
            .map
            .get(&(pid, page))
            .ok_or(PageFileError::SlotMissing)?;
        let contents = unsafe { self.phys.frame_bytes(frame) };
        contents.copy_from_slice(&self.images[slot]);
        Ok(())
    }

    fn remove(&mut self, pid: Pid, page: Page) -> bool {
        match self.map.remove(&(pid, page)) {
            Some(slot) => {
                self.recycled.push(slot);
                true
            }
            None => false,
        }
    }

    fn free_slots(&self) -> usize {
        self.capacity - self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Machine;
    use x86_64::{structures::paging::FrameAllocator, VirtAddr};

    fn page(n: u64) -> Page {
        Page::containing_address(VirtAddr::new(0x4000_0000 + n * 4096))
    }

    #[test]
    fn test_write_back_then_read_into_round_trips() {
        let mut machine = Machine::new(4);
        let mut store = RamPageFile::new(machine.window(), 2);
        let frame = machine.frames.allocate_frame().unwrap();

        machine.fill_frame(frame, 0xAB);
        store.reserve_slot(1, page(0)).unwrap();
        store.write_back(1, page(0), frame).unwrap();

        machine.fill_frame(frame, 0x00);
        store.read_into(1, page(0), frame).unwrap();
        assert!(machine.frame_contents(frame).iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_reserved_slot_reads_as_zero() {
        let mut machine = Machine::new(4);
        let mut store = RamPageFile::new(machine.window(), 1);
        let frame = machine.frames.allocate_frame().unwrap();

        machine.fill_frame(frame, 0x77);
        store.reserve_slot(1, page(0)).unwrap();
        store.read_into(1, page(0), frame).unwrap();
        assert!(machine.frame_contents(frame).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_capacity_and_recycling() {
        let mut machine = Machine::new(4);
        let mut store = RamPageFile::new(machine.window(), 2);
        let frame = machine.frames.allocate_frame().unwrap();

        store.reserve_slot(1, page(0)).unwrap();
        store.reserve_slot(2, page(0)).unwrap();
        // same key again does not take a slot
        store.reserve_slot(2, page(0)).unwrap();
        assert_eq!(store.free_slots(), 0);
        assert_eq!(store.reserve_slot(1, page(1)), Err(PageFileError::NoSpace));

        machine.fill_frame(frame, 0x55);
        store.write_back(1, page(0), frame).unwrap();
        assert!(store.remove(1, page(0)));
        assert!(!store.remove(1, page(0)));

        // the recycled slot comes back zeroed
        store.reserve_slot(1, page(1)).unwrap();
        store.read_into(1, page(1), frame).unwrap();
        assert!(machine.frame_contents(frame).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_missing_slot_is_reported() {
        let mut machine = Machine::new(4);
        let mut store = RamPageFile::new(machine.window(), 2);
        let frame = machine.frames.allocate_frame().unwrap();

        assert!(!store.exists(3, page(9)));
        assert_eq!(store.write_back(3, page(9), frame), Err(PageFileError::SlotMissing));
        assert_eq!(store.read_into(3, page(9), frame), Err(PageFileError::SlotMissing));
    }
}
