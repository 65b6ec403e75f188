//! The memory manager: the one context that owns the physical frames, the
//! page file, the kernel heap and the paging policy.
//!
//! Address spaces and processes are owned by the process manager and passed
//! in by reference.

pub mod fault;
pub mod replacement;

use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, Size4KiB},
    PhysAddr, VirtAddr,
};

use crate::{
    config::{PlacementStrategy, ReplacementPolicy, VmConfig},
    memory::{
        kheap::{KernelHeap, KernelHeapError},
        pagefile::PageFileStore,
        paging::PageTableManager,
    },
    processes::Process,
};

pub use fault::{FaultError, FaultKind};

pub struct MemoryManager<F, P> {
    pub frames: F,
    pub page_file: P,
    config: VmConfig,
    kernel_heap: KernelHeap,
}

impl<F, P> MemoryManager<F, P>
where
    F: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
    P: PageFileStore,
{
    pub fn new(frames: F, page_file: P, config: VmConfig) -> Self {
        Self::with_kernel_heap(frames, page_file, config, KernelHeap::new())
    }

    pub fn with_kernel_heap(
        frames: F,
        page_file: P,
        config: VmConfig,
        kernel_heap: KernelHeap,
    ) -> Self {
        MemoryManager {
            frames,
            page_file,
            config,
            kernel_heap,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// A process whose working set has the configured capacity
    pub fn create_process(&self) -> Process {
        Process::new(self.config.working_set_size)
    }

    pub fn set_replacement_policy(&mut self, policy: ReplacementPolicy) {
        self.config.replacement = policy;
    }

    pub fn is_replacement_lru(&self) -> bool {
        self.config.replacement == ReplacementPolicy::Lru
    }

    pub fn is_replacement_clock(&self) -> bool {
        self.config.replacement == ReplacementPolicy::Clock
    }

    pub fn set_placement_strategy(&mut self, strategy: PlacementStrategy) {
        self.config.placement = strategy;
    }

    pub fn is_uheap_next_fit(&self) -> bool {
        self.config.placement == PlacementStrategy::NextFit
    }

    pub fn is_uheap_best_fit(&self) -> bool {
        self.config.placement == PlacementStrategy::BestFit
    }

    pub fn kernel_heap(&self) -> &KernelHeap {
        &self.kernel_heap
    }

    /// Allocates `size` bytes of kernel heap in the kernel address space
    pub fn kmalloc<M: PageTableManager>(
        &mut self,
        size: usize,
        kernel_space: &mut M,
    ) -> Result<VirtAddr, KernelHeapError> {
        self.kernel_heap.allocate(size, kernel_space, &mut self.frames)
    }

    pub fn kfree<M: PageTableManager>(&mut self, addr: VirtAddr, kernel_space: &mut M) {
        self.kernel_heap.release(addr, kernel_space, &mut self.frames);
    }

    pub fn kheap_physical_address<M: PageTableManager>(
        &self,
        addr: VirtAddr,
        kernel_space: &M,
    ) -> Option<PhysAddr> {
        self.kernel_heap.physical_address(addr, kernel_space)
    }

    pub fn kheap_virtual_address<M: PageTableManager>(
        &self,
        phys: PhysAddr,
        kernel_space: &M,
    ) -> Option<VirtAddr> {
        self.kernel_heap.virtual_address(phys, kernel_space)
    }
}
