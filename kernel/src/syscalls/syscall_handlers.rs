use log::warn;
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, Size4KiB},
    VirtAddr,
};

use crate::{
    constants::syscalls::{
        SYSCALL_ALLOCATE_MEM, SYSCALL_ERROR, SYSCALL_FREE_MEM, SYSCALL_MOVE_MEM,
        SYSCALL_UHEAP_BEST_FIT, SYSCALL_UHEAP_NEXT_FIT,
    },
    memory::{pagefile::PageFileStore, paging::PageTableManager},
    processes::Process,
    syscalls::memory::SyscallError,
    vm::MemoryManager,
};

/// Runs memory syscall `syscall_num` for `process` with the raw register
/// arguments and returns the value for the caller's return register.
pub fn dispatch_syscall<F, P, M>(
    manager: &mut MemoryManager<F, P>,
    process: &mut Process,
    space: &mut M,
    syscall_num: u32,
    args: [u64; 3],
) -> u64
where
    F: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
    P: PageFileStore,
    M: PageTableManager,
{
    let [param_1, param_2, param_3] = args;

    let result = match syscall_num {
        SYSCALL_ALLOCATE_MEM => user_addr(param_1)
            .and_then(|addr| manager.sys_allocate_mem(process, addr, param_2)),
        SYSCALL_FREE_MEM => user_addr(param_1)
            .and_then(|addr| manager.sys_free_mem(process, space, addr, param_2)),
        SYSCALL_MOVE_MEM => user_addr(param_1).and_then(|src| {
            let dst = user_addr(param_2)?;
            manager.sys_move_mem(process, src, dst, param_3)
        }),
        SYSCALL_UHEAP_NEXT_FIT => return manager.is_uheap_next_fit() as u64,
        SYSCALL_UHEAP_BEST_FIT => return manager.is_uheap_best_fit() as u64,
        _ => {
            warn!("pid {}: unknown syscall {}", process.pid, syscall_num);
            return SYSCALL_ERROR;
        }
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            warn!("pid {}: syscall {} failed: {}", process.pid, syscall_num, err);
            SYSCALL_ERROR
        }
    }
}

fn user_addr(raw: u64) -> Result<VirtAddr, SyscallError> {
    VirtAddr::try_new(raw).map_err(|_| SyscallError::InvalidRange)
}
