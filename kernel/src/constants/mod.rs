//! Address-space layout and syscall numbers.

pub mod memory;
pub mod syscalls;
