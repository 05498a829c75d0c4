//! System call interface (spec.md C10/C11)
//!
//! The syscall table: `SYS_HALT` through `SYS_CLOSE` covering process and
//! file lifecycle, extended with `mmap`/`munmap` and the directory-aware
//! filesystem calls (`chdir`/`mkdir`/`readdir`/`isdir`/`inumber`/
//! `symlink`/`dup2`). Every argument a real trap frame would decode out
//! of `rdi`/`rsi`/`rdx`/`r10`/`r8` arrives here pre-unpacked as plain
//! `usize`s; pointer-typed arguments are walked through [`uaccess`]
//! rather than dereferenced directly, since this kernel has no literal
//! user/kernel address split to cross.

extern crate alloc;

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::KernelError;
use crate::mm::vas::AddressSpace;
use crate::sched::task::Thread;

mod filesystem;
mod memory;
mod process;
pub mod uaccess;

use filesystem::*;
use memory::*;
use process::*;

/// System call numbers, in dispatch-table order.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Fork = 2,
    Exec = 3,
    Wait = 4,
    Create = 5,
    Remove = 6,
    Open = 7,
    Filesize = 8,
    Read = 9,
    Write = 10,
    Seek = 11,
    Tell = 12,
    Close = 13,
    Mmap = 14,
    Munmap = 15,
    Chdir = 16,
    Mkdir = 17,
    Readdir = 18,
    Isdir = 19,
    Inumber = 20,
    Symlink = 21,
    Dup2 = 22,
}

impl TryFrom<usize> for Syscall {
    type Error = ();

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Syscall::Halt,
            1 => Syscall::Exit,
            2 => Syscall::Fork,
            3 => Syscall::Exec,
            4 => Syscall::Wait,
            5 => Syscall::Create,
            6 => Syscall::Remove,
            7 => Syscall::Open,
            8 => Syscall::Filesize,
            9 => Syscall::Read,
            10 => Syscall::Write,
            11 => Syscall::Seek,
            12 => Syscall::Tell,
            13 => Syscall::Close,
            14 => Syscall::Mmap,
            15 => Syscall::Munmap,
            16 => Syscall::Chdir,
            17 => Syscall::Mkdir,
            18 => Syscall::Readdir,
            19 => Syscall::Isdir,
            20 => Syscall::Inumber,
            21 => Syscall::Symlink,
            22 => Syscall::Dup2,
            _ => return Err(()),
        })
    }
}

/// Syscall-boundary errors, converted to the user ABI's `-1` at the
/// dispatcher. Distinct from [`crate::error::SyscallError`], which is a
/// nested variant of [`KernelError`] used internally by the fault path;
/// this one is the outward-facing ABI encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscallNumber,
    BadPointer,
    Kernel(KernelErrorTag),
}

/// A flattened, `Copy`-able tag for whichever [`KernelError`] variant
/// caused a syscall to fail, kept only for logging — the ABI itself
/// collapses every failure to `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelErrorTag {
    NotFound,
    PermissionDenied,
    OutOfResources,
    InvalidArgument,
    Other,
}

impl From<KernelError> for SyscallError {
    fn from(e: KernelError) -> Self {
        use crate::error::FsError;
        let tag = match e {
            KernelError::Fs(FsError::NotFound) => KernelErrorTag::NotFound,
            KernelError::Fs(FsError::PermissionDenied) => KernelErrorTag::PermissionDenied,
            KernelError::Fs(FsError::NoSpace) | KernelError::OutOfFrames | KernelError::OutOfSwap => {
                KernelErrorTag::OutOfResources
            }
            KernelError::InvalidArgument { .. } | KernelError::BadFileDescriptor { .. } => {
                KernelErrorTag::InvalidArgument
            }
            KernelError::InvalidAddress { .. } | KernelError::UnmappedMemory { .. } => return SyscallError::BadPointer,
            _ => KernelErrorTag::Other,
        };
        SyscallError::Kernel(tag)
    }
}

pub type SyscallResult = Result<usize, SyscallError>;

/// Sign-extends `value` into the ABI's `-1` convention for a failed
/// `pid_t`/fd-returning call, matching the process-creation and
/// file-open failure contract.
pub const FAILURE: usize = usize::MAX;

pub(crate) fn current_thread() -> Result<Arc<Thread>, SyscallError> {
    crate::process::current_thread().ok_or(SyscallError::Kernel(KernelErrorTag::Other))
}

pub(crate) fn current_space() -> Result<Arc<Mutex<AddressSpace>>, SyscallError> {
    current_thread()?
        .address_space
        .lock()
        .clone()
        .ok_or(SyscallError::Kernel(KernelErrorTag::Other))
}

/// Architecture trap-frame entry point: unpacks a syscall trap's five
/// argument registers and returns the value that would be loaded back
/// into `rax`.
#[no_mangle]
pub extern "C" fn syscall_handler(
    syscall_num: usize,
    arg1: usize,
    arg2: usize,
    arg3: usize,
    arg4: usize,
    arg5: usize,
) -> isize {
    let result = match Syscall::try_from(syscall_num) {
        Ok(syscall) => handle_syscall(syscall, arg1, arg2, arg3, arg4, arg5),
        Err(()) => Err(SyscallError::InvalidSyscallNumber),
    };

    match result {
        Ok(value) => value as isize,
        Err(e) => {
            log::debug!("syscall {syscall_num} failed: {e:?}");
            -1
        }
    }
}

fn handle_syscall(syscall: Syscall, arg1: usize, arg2: usize, arg3: usize, arg4: usize, _arg5: usize) -> SyscallResult {
    match syscall {
        Syscall::Halt => sys_halt(),
        Syscall::Exit => sys_exit(arg1),
        Syscall::Fork => sys_fork(),
        Syscall::Exec => sys_exec(arg1),
        Syscall::Wait => sys_wait(arg1),

        Syscall::Create => sys_create(arg1, arg2),
        Syscall::Remove => sys_remove(arg1),
        Syscall::Open => sys_open(arg1),
        Syscall::Filesize => sys_filesize(arg1),
        Syscall::Read => sys_read(arg1, arg2, arg3),
        Syscall::Write => sys_write(arg1, arg2, arg3),
        Syscall::Seek => sys_seek(arg1, arg2),
        Syscall::Tell => sys_tell(arg1),
        Syscall::Close => sys_close(arg1),
        Syscall::Chdir => sys_chdir(arg1),
        Syscall::Mkdir => sys_mkdir(arg1),
        Syscall::Readdir => sys_readdir(arg1, arg2),
        Syscall::Isdir => sys_isdir(arg1),
        Syscall::Inumber => sys_inumber(arg1),
        Syscall::Symlink => sys_symlink(arg1, arg2),
        Syscall::Dup2 => sys_dup2(arg1, arg2),

        Syscall::Mmap => sys_mmap(arg1, arg2, arg3, arg4),
        Syscall::Munmap => sys_munmap(arg1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers_round_trip() {
        for n in 0..=22usize {
            assert!(Syscall::try_from(n).is_ok(), "syscall {n} should decode");
        }
    }

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert!(Syscall::try_from(999).is_err());
    }

    #[test]
    fn invalid_syscall_reports_minus_one() {
        assert_eq!(syscall_handler(999, 0, 0, 0, 0, 0), -1);
    }
}
