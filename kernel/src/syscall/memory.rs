//! Memory-mapping syscalls: mmap/munmap (spec.md §4.5, C11)
//!
//! `mmap` always maps a whole file from offset 0 and grows no further
//! than its length; there is no `prot`/`offset` argument to decode,
//! matching the four-register signature the dispatcher already unpacks.
//! `mprotect`/`brk` aren't part of this syscall table — there is no heap
//! syscall, and this kernel's `AddressSpace` has no region-protection or
//! program-break API to back one with.

extern crate alloc;

use crate::error::KernelError;
use crate::mm::vas::AddressSpace;
use crate::mm::VirtualAddress;

use super::{current_space, current_thread, SyscallResult};

/// `SYS_MMAP(addr, length, writable, fd)`. `addr` of `0` is rejected the
/// same way any attempt to map it is rejected, since the null page must
/// never be mapped; a `length` of `0` is likewise invalid.
pub(super) fn sys_mmap(addr: usize, length: usize, writable: usize, fd: usize) -> SyscallResult {
    if addr == 0 || length == 0 {
        return Err(KernelError::InvalidArgument { name: "mmap address/length" }.into());
    }
    let thread = current_thread()?;
    let file = thread
        .fd_table
        .lock()
        .get(fd as i32)
        .ok_or(KernelError::BadFileDescriptor { fd: fd as i32 })?;

    let space = current_space()?;
    let base = AddressSpace::mmap(&space, VirtualAddress::new(addr as u64), length, writable != 0, file.reopen())?;
    Ok(base.as_usize())
}

/// `SYS_MUNMAP(addr)`: `addr` must be a base a prior `mmap` returned.
pub(super) fn sys_munmap(addr: usize) -> SyscallResult {
    current_space()?.lock().munmap(VirtualAddress::new(addr as u64))?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmap_rejects_null_address() {
        assert!(matches!(sys_mmap(0, 4096, 1, 3), Err(super::super::SyscallError::Kernel(_))));
    }

    #[test]
    fn mmap_rejects_zero_length() {
        assert!(matches!(sys_mmap(0x1000, 0, 1, 3), Err(super::super::SyscallError::Kernel(_))));
    }
}
