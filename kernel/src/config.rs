//! Run-time memory-management policy.
//!
//! The layout of the address space is fixed at compile time in
//! [`constants::memory`](crate::constants::memory); the knobs here may change
//! while the kernel runs.

use crate::constants::memory::{DEFAULT_PAGE_FILE_SLOTS, DEFAULT_WORKING_SET_SIZE};

/// How a full working set picks the page to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementPolicy {
    /// Evict the entry with the oldest recency timestamp.
    #[default]
    Lru,
    /// Second chance: sweep the working set, clearing accessed bits until an
    /// unaccessed page is found.
    Clock,
}

/// How the user heap searches its free runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementStrategy {
    /// Resume the search where the previous allocation ended.
    #[default]
    NextFit,
    /// Take the smallest free run that is large enough.
    BestFit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub replacement: ReplacementPolicy,
    pub placement: PlacementStrategy,
    /// Working-set capacity handed to processes created under this config
    pub working_set_size: usize,
    /// Number of page images the page file can hold
    pub page_file_slots: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VmConfig {
    pub const fn new() -> Self {
        VmConfig {
            replacement: ReplacementPolicy::Lru,
            placement: PlacementStrategy::NextFit,
            working_set_size: DEFAULT_WORKING_SET_SIZE,
            page_file_slots: DEFAULT_PAGE_FILE_SLOTS,
        }
    }

    pub const fn with_replacement(mut self, policy: ReplacementPolicy) -> Self {
        self.replacement = policy;
        self
    }

    pub const fn with_placement(mut self, strategy: PlacementStrategy) -> Self {
        self.placement = strategy;
        self
    }

    pub const fn with_working_set_size(mut self, size: usize) -> Self {
        self.working_set_size = size;
        self
    }

    pub const fn with_page_file_slots(mut self, slots: usize) -> Self {
        self.page_file_slots = slots;
        self
    }
}
