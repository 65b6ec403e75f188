// Syscall numbers
pub const SYSCALL_ALLOCATE_MEM: u32 = 6;
pub const SYSCALL_FREE_MEM: u32 = 7;
pub const SYSCALL_MOVE_MEM: u32 = 8;
pub const SYSCALL_UHEAP_NEXT_FIT: u32 = 9;
pub const SYSCALL_UHEAP_BEST_FIT: u32 = 10;

// Returned in place of a value when a memory syscall fails
pub const SYSCALL_ERROR: u64 = u64::MAX;
