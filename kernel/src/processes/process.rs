use core::{
    ops::Range,
    sync::atomic::{AtomicU32, Ordering},
};

use x86_64::VirtAddr;

use crate::{
    constants::memory::{USER_STACK_BOTTOM, USER_STACK_TOP},
    processes::working_set::WorkingSet,
};

pub type Pid = u32;

// process counter must be thread-safe
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// The paging state of one address-space owner. Creation and teardown belong
/// to the process manager; the fault path only touches the working set and
/// the counters.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub working_set: WorkingSet,
    stack: Range<VirtAddr>,
    pub table_faults: u64,
    pub page_faults: u64,
}

impl Process {
    pub fn new(working_set_size: usize) -> Self {
        Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            working_set: WorkingSet::new(working_set_size),
            stack: VirtAddr::new(USER_STACK_BOTTOM)..VirtAddr::new(USER_STACK_TOP),
            table_faults: 0,
            page_faults: 0,
        }
    }

    pub fn with_stack(mut self, stack: Range<VirtAddr>) -> Self {
        self.stack = stack;
        self
    }

    pub fn stack(&self) -> &Range<VirtAddr> {
        &self.stack
    }

    pub fn in_stack(&self, addr: VirtAddr) -> bool {
        self.stack.contains(&addr)
    }
}
