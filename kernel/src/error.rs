//! Kernel-wide error types
//!
//! Every fallible operation in the core triad returns `Result<_, KernelError>`.
//! Only invariant violations (lock misuse, reentrant acquire, blocking in
//! interrupt context) panic; everything else propagates to the syscall
//! boundary, which converts `Err` into the user ABI's `-1`/`false`/`null`.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    OutOfMemory { requested: usize, available: usize },
    OutOfFrames,
    OutOfSwap,
    InvalidAddress { addr: usize },
    UnmappedMemory { addr: usize },

    ProcessNotFound { pid: u64 },
    ThreadNotFound { tid: u64 },
    NotAChild { pid: u64 },
    AlreadyWaited { pid: u64 },

    Fs(FsError),
    Syscall(SyscallError),

    InvalidArgument { name: &'static str },
    TooManyOpenFiles,
    BadFileDescriptor { fd: i32 },
    DonationDepthExceeded,
}

/// Filesystem-specific errors (open/create/remove/etc. never panic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    NotAFile,
    IsADirectory,
    DirectoryNotEmpty,
    NoSpace,
    InvalidPath,
    NotASymlink,
    TooManySymlinks,
    FileTooLarge,
    IoError,
    PermissionDenied,
}

/// Syscall-boundary errors, converted to the user ABI at the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscallNumber { nr: usize },
    BadPointer { addr: usize },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl From<FsError> for KernelError {
    fn from(e: FsError) -> Self {
        KernelError::Fs(e)
    }
}

impl From<SyscallError> for KernelError {
    fn from(e: SyscallError) -> Self {
        KernelError::Syscall(e)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {requested} bytes, {available} available"
            ),
            Self::OutOfFrames => write!(f, "no physical frames available and eviction failed"),
            Self::OutOfSwap => write!(f, "swap device exhausted"),
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{addr:x}"),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{addr:x}"),
            Self::ProcessNotFound { pid } => write!(f, "process {pid} not found"),
            Self::ThreadNotFound { tid } => write!(f, "thread {tid} not found"),
            Self::NotAChild { pid } => write!(f, "{pid} is not a child of the caller"),
            Self::AlreadyWaited { pid } => write!(f, "already waited on {pid}"),
            Self::Fs(e) => write!(f, "filesystem error: {e:?}"),
            Self::Syscall(e) => write!(f, "syscall error: {e:?}"),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            Self::TooManyOpenFiles => write!(f, "file descriptor table full"),
            Self::BadFileDescriptor { fd } => write!(f, "bad file descriptor {fd}"),
            Self::DonationDepthExceeded => write!(f, "donation chain exceeded maximum depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_error_converts_into_kernel_error() {
        let e: KernelError = FsError::NotFound.into();
        assert_eq!(e, KernelError::Fs(FsError::NotFound));
    }
}
