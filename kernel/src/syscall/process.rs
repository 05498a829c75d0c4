//! Process-lifecycle syscalls: halt/exit/fork/exec/wait (spec.md C10)

use crate::mm::VirtualAddress;
use crate::process;
use crate::sched::task::ThreadId;

use super::uaccess::copy_in_cstr;
use super::{current_space, SyscallResult};

/// `SYS_HALT`: powers the machine off. Diverges — there is no return
/// value to encode.
pub(super) fn sys_halt() -> SyscallResult {
    log::info!("syscall: halt");
    crate::arch::halt()
}

/// `SYS_EXIT`: `status` is a raw register value truncated the same way
/// the x86-64 ABI would sign-narrow an `int` argument.
pub(super) fn sys_exit(status: usize) -> SyscallResult {
    let status = status as i32;
    process::exit_current(status);
    Ok(status as usize)
}

/// `SYS_FORK`: the parent's syscall returns the child's pid, with the
/// child's own (separately scheduled) return from the same syscall
/// coming back as `0`. This kernel's fork runs
/// synchronously on the caller's stack with no second execution context
/// to return `0` from, so this single call always yields the new tid —
/// see [`crate::process::fork`]'s doc comment for the same
/// simplification.
pub(super) fn sys_fork() -> SyscallResult {
    process::fork_current().map(|tid| tid.0 as usize).map_err(Into::into)
}

/// `SYS_EXEC`: `cmd_line_ptr` names a NUL-terminated command line in the
/// caller's address space.
pub(super) fn sys_exec(cmd_line_ptr: usize) -> SyscallResult {
    let space = current_space()?;
    let cmd_line = copy_in_cstr(&space, VirtualAddress::new(cmd_line_ptr as u64), crate::fs::PATH_MAX)?;
    process::exec_current(&cmd_line).map(|tid| tid.0 as usize).map_err(Into::into)
}

/// `SYS_WAIT`: `pid` is the raw tid the kernel handed back from a prior
/// `fork`/`exec`.
pub(super) fn sys_wait(pid: usize) -> SyscallResult {
    process::wait_current(ThreadId(pid as u64)).map(|status| status as usize).map_err(Into::into)
}
