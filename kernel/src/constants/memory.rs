pub const PAGE_SIZE: u64 = 4096;
pub const FRAME_SIZE: usize = 4096;

// Kernel heap lives in the top 4 GiB of the higher half, bump allocated upwards
pub const KERNEL_HEAP_START: u64 = 0xFFFF_FFFF_0000_0000;
pub const KERNEL_HEAP_SIZE: u64 = 16 * 1024 * 1024; // 16 MB
pub const KERNEL_HEAP_MAX: u64 = KERNEL_HEAP_START + KERNEL_HEAP_SIZE;
pub const KERNEL_HEAP_MAX_BLOCKS: usize = 512;

// Per-process heap region, carved into pages by the user heap allocator
pub const USER_HEAP_START: u64 = 0x8000_0000;
pub const USER_HEAP_MAX: u64 = 0xA000_0000;
pub const USER_HEAP_PAGES: usize = ((USER_HEAP_MAX - USER_HEAP_START) / PAGE_SIZE) as usize;

pub const USER_STACK_TOP: u64 = 0xEEBF_E000;
pub const USER_STACK_SIZE: u64 = 1024 * 1024; // 1 MB
pub const USER_STACK_BOTTOM: u64 = USER_STACK_TOP - USER_STACK_SIZE;

pub const DEFAULT_WORKING_SET_SIZE: usize = 64;
pub const DEFAULT_PAGE_FILE_SLOTS: usize = 4096;

pub const BITMAP_ENTRY_SIZE: usize = 64;
pub const FULL_BITMAP_ENTRY: u64 = 0xFFFFFFFFFFFFFFFF;
