use alloc::{vec, vec::Vec};
use core::fmt;

use x86_64::structures::paging::Page;

/// One resident page of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkingSetEntry {
    /// The resident page, `None` while the slot is free
    pub page: Option<Page>,
    /// Aged recency history. Higher means used more recently.
    pub time_stamp: u32,
}

impl WorkingSetEntry {
    pub fn is_occupied(&self) -> bool {
        self.page.is_some()
    }
}

/// Fixed-capacity table of the pages a process holds in memory, with a
/// circular cursor marking where the next page goes.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    entries: Vec<WorkingSetEntry>,
    cursor: usize,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "working set needs at least one slot");
        WorkingSet {
            entries: vec![WorkingSetEntry::default(); capacity],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_occupied()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.entries.iter().all(WorkingSetEntry::is_occupied)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = index % self.capacity();
    }

    pub fn advance_cursor(&mut self) {
        self.set_cursor(self.cursor + 1);
    }

    pub fn entry(&self, index: usize) -> &WorkingSetEntry {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[WorkingSetEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [WorkingSetEntry] {
        &mut self.entries
    }

    pub fn find(&self, page: Page) -> Option<usize> {
        self.entries.iter().position(|e| e.page == Some(page))
    }

    /// Puts `page` in the first free slot at or after the cursor and moves the
    /// cursor past it. Returns the slot, or `None` if the set is full.
    pub fn place(&mut self, page: Page) -> Option<usize> {
        let capacity = self.capacity();
        let slot = (0..capacity)
            .map(|step| (self.cursor + step) % capacity)
            .find(|&i| !self.entries[i].is_occupied())?;

        self.entries[slot] = WorkingSetEntry {
            page: Some(page),
            time_stamp: 0,
        };
        self.set_cursor(slot + 1);
        Some(slot)
    }

    pub fn clear(&mut self, index: usize) {
        self.entries[index] = WorkingSetEntry::default();
    }
}

impl fmt::Display for WorkingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "working set ({}/{}):", self.len(), self.capacity())?;
        for (i, entry) in self.entries.iter().enumerate() {
            let marker = if i == self.cursor { "  <--" } else { "" };
            match entry.page {
                Some(page) => writeln!(
                    f,
                    "  [{:3}] {:#014x} ts {:#010x}{}",
                    i,
                    page.start_address().as_u64(),
                    entry.time_stamp,
                    marker
                )?,
                None => writeln!(f, "  [{:3}] empty{}", i, marker)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use x86_64::VirtAddr;

    fn page(n: u64) -> Page {
        Page::containing_address(VirtAddr::new(0x4000_0000 + n * 4096))
    }

    #[test]
    fn test_place_fills_in_cursor_order_and_wraps() {
        let mut ws = WorkingSet::new(3);
        assert_eq!(ws.place(page(0)), Some(0));
        assert_eq!(ws.place(page(1)), Some(1));
        assert_eq!(ws.place(page(2)), Some(2));
        assert_eq!(ws.cursor(), 0);
        assert!(ws.is_full());
        assert_eq!(ws.place(page(3)), None);
    }

    #[test]
    fn test_place_skips_to_free_slot() {
        let mut ws = WorkingSet::new(4);
        for n in 0..4 {
            ws.place(page(n));
        }
        ws.clear(1);
        ws.set_cursor(3);

        assert_eq!(ws.place(page(9)), Some(1));
        assert_eq!(ws.cursor(), 2);
        assert_eq!(ws.find(page(9)), Some(1));
        assert_eq!(ws.len(), 4);
    }

    #[test]
    fn test_display_marks_cursor() {
        let mut ws = WorkingSet::new(2);
        ws.place(page(0));
        let dump = ws.to_string();

        assert!(dump.starts_with("working set (1/2):"));
        assert!(dump.contains("0x000040000000"));
        assert!(dump.contains("[  1] empty  <--"));
    }
}
