//! Victim selection for a full working set.

use log::trace;
use x86_64::structures::paging::PageTableFlags;

use crate::{
    config::ReplacementPolicy, memory::paging::PageTableManager,
    processes::working_set::WorkingSet,
};

const RECENT_BIT: u32 = 1 << 31;

/// Ages every resident page: the history shifts right and the top bit
/// records whether the page was touched since the previous fault. The
/// accessed bit is consumed.
pub fn age<M: PageTableManager>(working_set: &mut WorkingSet, space: &mut M) {
    for entry in working_set.entries_mut() {
        let Some(page) = entry.page else {
            continue;
        };
        let accessed = space
            .flags(page)
            .is_some_and(|flags| flags.contains(PageTableFlags::ACCESSED));

        entry.time_stamp >>= 1;
        if accessed {
            entry.time_stamp |= RECENT_BIT;
            space.update_flags(page, PageTableFlags::empty(), PageTableFlags::ACCESSED);
        }
    }
}

/// The slot with the smallest time stamp, lowest index first
pub fn lru_victim(working_set: &WorkingSet) -> Option<usize> {
    working_set
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.is_occupied())
        .min_by_key(|(_, entry)| entry.time_stamp)
        .map(|(index, _)| index)
}

/// Second chance. Sweeps from the cursor, clearing accessed bits, and stops
/// at the first page that was not accessed. The cursor is left on the victim.
///
/// A full sweep clears every bit it passes, so the second sweep always stops.
pub fn clock_victim<M: PageTableManager>(
    working_set: &mut WorkingSet,
    space: &mut M,
) -> Option<usize> {
    for _ in 0..2 * working_set.capacity() {
        let index = working_set.cursor();
        let Some(page) = working_set.entry(index).page else {
            return Some(index);
        };
        let accessed = space
            .flags(page)
            .is_some_and(|flags| flags.contains(PageTableFlags::ACCESSED));
        if !accessed {
            return Some(index);
        }

        trace!("clock: second chance for {:?}", page);
        space.update_flags(page, PageTableFlags::empty(), PageTableFlags::ACCESSED);
        working_set.advance_cursor();
    }
    None
}

pub fn select_victim<M: PageTableManager>(
    policy: ReplacementPolicy,
    working_set: &mut WorkingSet,
    space: &mut M,
) -> Option<usize> {
    match policy {
        ReplacementPolicy::Lru => lru_victim(working_set),
        ReplacementPolicy::Clock => clock_victim(working_set, space),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Machine;
    use x86_64::{
        structures::paging::{FrameAllocator, Page},
        VirtAddr,
    };

    const USER: PageTableFlags = PageTableFlags::PRESENT
        .union(PageTableFlags::WRITABLE)
        .union(PageTableFlags::USER_ACCESSIBLE);

    fn page(n: u64) -> Page {
        Page::containing_address(VirtAddr::new(0x4000_0000 + n * 4096))
    }

    /// An address space with `count` mapped pages, all of them in a working
    /// set of the same capacity
    fn resident(machine: &mut Machine, count: u64) -> (impl PageTableManager, WorkingSet) {
        let mut space = machine.address_space();
        let mut working_set = WorkingSet::new(count as usize);
        for n in 0..count {
            let frame = machine.frames.allocate_frame().unwrap();
            space.map(page(n), frame, USER, &mut machine.frames).unwrap();
            working_set.place(page(n));
        }
        (space, working_set)
    }

    fn touch<M: PageTableManager>(space: &mut M, n: u64) {
        space.update_flags(page(n), PageTableFlags::ACCESSED, PageTableFlags::empty());
    }

    #[test]
    fn test_aging_shifts_and_consumes_accessed_bit() {
        let mut machine = Machine::new(32);
        let (mut space, mut ws) = resident(&mut machine, 2);

        touch(&mut space, 1);
        age(&mut ws, &mut space);
        assert_eq!(ws.entry(0).time_stamp, 0);
        assert_eq!(ws.entry(1).time_stamp, RECENT_BIT);
        assert!(!space.flags(page(1)).unwrap().contains(PageTableFlags::ACCESSED));

        touch(&mut space, 0);
        age(&mut ws, &mut space);
        assert_eq!(ws.entry(0).time_stamp, RECENT_BIT);
        assert_eq!(ws.entry(1).time_stamp, RECENT_BIT >> 1);
        assert_eq!(lru_victim(&ws), Some(1));
    }

    #[test]
    fn test_lru_ties_go_to_lowest_index() {
        let mut machine = Machine::new(32);
        let (_space, mut ws) = resident(&mut machine, 3);
        ws.entries_mut()[0].time_stamp = 5;
        ws.entries_mut()[1].time_stamp = 2;
        ws.entries_mut()[2].time_stamp = 2;

        assert_eq!(lru_victim(&ws), Some(1));
    }

    #[test]
    fn test_clock_gives_second_chance() {
        let mut machine = Machine::new(32);
        let (mut space, mut ws) = resident(&mut machine, 3);
        touch(&mut space, 0);
        touch(&mut space, 1);

        assert_eq!(ws.cursor(), 0);
        assert_eq!(clock_victim(&mut ws, &mut space), Some(2));
        assert_eq!(ws.cursor(), 2);
        for n in 0..2 {
            assert!(!space.flags(page(n)).unwrap().contains(PageTableFlags::ACCESSED));
        }
    }

    #[test]
    fn test_clock_terminates_when_everything_was_accessed() {
        let mut machine = Machine::new(32);
        let (mut space, mut ws) = resident(&mut machine, 4);
        ws.set_cursor(2);
        for n in 0..4 {
            touch(&mut space, n);
        }

        // one full sweep clears all bits and lands back where it started
        assert_eq!(clock_victim(&mut ws, &mut space), Some(2));
    }
}
