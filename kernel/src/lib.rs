//! Virtual memory for the TAOS kernel: demand paging with per-process working
//! sets, a page file, the kernel heap and the user heap allocator.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod config;
pub mod constants;
pub mod logging;
pub mod memory;
pub mod processes;
pub mod syscalls;
pub mod uheap;
pub mod vm;

#[cfg(test)]
mod testing;

pub use config::VmConfig;
pub use vm::MemoryManager;
