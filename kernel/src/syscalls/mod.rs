pub mod memory;
pub mod syscall_handlers;

pub use memory::SyscallError;
pub use syscall_handlers::dispatch_syscall;
