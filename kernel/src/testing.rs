//! Simulated hardware for host-side tests.
//!
//! Physical memory is a page-aligned heap buffer exposed through a
//! [`PhysWindow`], so the real page-table walker and page file run unchanged.
//! The recording wrappers log TLB invalidations and page-file traffic into one
//! shared, ordered event log.

use alloc::{
    alloc::{alloc_zeroed, dealloc, Layout},
    rc::Rc,
    vec::Vec,
};
use core::cell::RefCell;

use x86_64::{
    structures::paging::{Page, PhysFrame},
    PhysAddr, VirtAddr,
};

use crate::{
    constants::memory::FRAME_SIZE,
    memory::{
        bitmap_frame_allocator::BitmapFrameAllocator,
        pagefile::{PageFileError, PageFileStore, RamPageFile},
        paging::OffsetAddressSpace,
        phys::PhysWindow,
        tlb::Tlb,
    },
    processes::Pid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Invalidate(Page),
    Reserve(Pid, Page),
    WriteBack(Pid, Page),
    ReadIn(Pid, Page),
    Remove(Pid, Page),
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.0.borrow().iter().position(|&e| e == event)
    }
}

pub struct RecordingTlb(EventLog);

impl Tlb for RecordingTlb {
    fn invalidate(&self, page: Page) {
        self.0.push(Event::Invalidate(page));
    }
}

pub struct RecordingPageFile<P> {
    pub inner: P,
    log: EventLog,
}

impl<P: PageFileStore> PageFileStore for RecordingPageFile<P> {
    fn exists(&self, pid: Pid, page: Page) -> bool {
        self.inner.exists(pid, page)
    }

    fn reserve_slot(&mut self, pid: Pid, page: Page) -> Result<(), PageFileError> {
        self.inner.reserve_slot(pid, page)?;
        self.log.push(Event::Reserve(pid, page));
        Ok(())
    }

    fn write_back(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError> {
        self.inner.write_back(pid, page, frame)?;
        self.log.push(Event::WriteBack(pid, page));
        Ok(())
    }

    fn read_into(&mut self, pid: Pid, page: Page, frame: PhysFrame) -> Result<(), PageFileError> {
        self.inner.read_into(pid, page, frame)?;
        self.log.push(Event::ReadIn(pid, page));
        Ok(())
    }

    fn remove(&mut self, pid: Pid, page: Page) -> bool {
        let removed = self.inner.remove(pid, page);
        if removed {
            self.log.push(Event::Remove(pid, page));
        }
        removed
    }

    fn free_slots(&self) -> usize {
        self.inner.free_slots()
    }
}

struct FakePhysMemory {
    base: *mut u8,
    layout: Layout,
}

impl FakePhysMemory {
    fn new(frames: usize) -> Self {
        let layout = Layout::from_size_align(frames * FRAME_SIZE, FRAME_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null());
        FakePhysMemory { base, layout }
    }
}

impl Drop for FakePhysMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

/// Physical memory, a frame allocator over all of it and an event log.
pub struct Machine {
    memory: FakePhysMemory,
    pub frames: BitmapFrameAllocator,
    pub log: EventLog,
}

impl Machine {
    pub fn new(frames: usize) -> Self {
        Machine {
            memory: FakePhysMemory::new(frames),
            frames: BitmapFrameAllocator::new(
                PhysFrame::containing_address(PhysAddr::new(0)),
                frames,
            ),
            log: EventLog::default(),
        }
    }

    /// Moves the frame allocator out, e.g. into a memory manager. Address
    /// spaces built from this machine must be created first.
    pub fn take_frames(&mut self) -> BitmapFrameAllocator {
        let empty = BitmapFrameAllocator::new(PhysFrame::containing_address(PhysAddr::new(0)), 0);
        core::mem::replace(&mut self.frames, empty)
    }

    pub fn window(&self) -> PhysWindow {
        unsafe { PhysWindow::new(VirtAddr::new(self.memory.base as u64)) }
    }

    /// A new, empty address space whose invalidations go to the event log
    pub fn address_space(&mut self) -> OffsetAddressSpace<RecordingTlb> {
        OffsetAddressSpace::create(self.window(), &mut self.frames, RecordingTlb(self.log.clone()))
            .unwrap()
    }

    pub fn page_file(&self, slots: usize) -> RecordingPageFile<RamPageFile> {
        RecordingPageFile {
            inner: RamPageFile::new(self.window(), slots),
            log: self.log.clone(),
        }
    }

    pub fn fill_frame(&self, frame: PhysFrame, byte: u8) {
        unsafe { self.window().frame_bytes(frame) }.fill(byte);
    }

    pub fn frame_contents(&self, frame: PhysFrame) -> Vec<u8> {
        unsafe { self.window().frame_bytes(frame) }.to_vec()
    }
}
