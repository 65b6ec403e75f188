pub mod bitmap_frame_allocator;
pub mod kheap;
pub mod pagefile;
pub mod paging;
pub mod phys;
pub mod tlb;
