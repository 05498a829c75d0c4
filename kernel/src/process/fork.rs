//! `fork()`: duplicates the calling process (spec C10) — a CoW clone of
//! its address space, a clone of its file-descriptor table, and the
//! same entry point and registers, so the child "returns" from the
//! same syscall the parent did.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::Ordering as AtomicOrdering;

use crate::config::PRI_DEFAULT;
use crate::error::KernelResult;
use crate::mm::vas;
use crate::sched::task::{self, Thread, ThreadId};

/// Clones `parent`'s address space, file descriptors, and working
/// directory into a new thread, registers it as ready, and returns its
/// tid. An alternative design has the child perform this copy after its
/// own context switch starts running (so it can snapshot the parent's
/// register file); since this kernel does not wire a real user-mode
/// context switch at this layer, the parent does the copy synchronously
/// before returning. `fork_ok`/`sema_fork_complete` are still recorded
/// so callers that rely on them (the `wait`/`exit` handshake) observe
/// the same state a real concurrent fork would leave behind.
pub fn fork(parent_tid: ThreadId) -> KernelResult<ThreadId> {
    let parent = task::lookup(parent_tid).ok_or(crate::error::KernelError::ThreadNotFound { pid: parent_tid.0 })?;

    let tid = task::alloc_tid();
    let child = Arc::new(Thread::new(tid, &parent.name.lock(), PRI_DEFAULT, Some(parent_tid)));
    child.cwd.store(parent.cwd.load(AtomicOrdering::Relaxed), AtomicOrdering::Relaxed);
    child.entry_rip.store(parent.entry_rip.load(AtomicOrdering::Relaxed), AtomicOrdering::Relaxed);
    child.entry_rsp.store(parent.entry_rsp.load(AtomicOrdering::Relaxed), AtomicOrdering::Relaxed);

    *child.fd_table.lock() = parent.fd_table.lock().clone_for_fork();
    if let Some(file) = parent.executing_file.lock().clone() {
        file.inc_ref();
        *child.executing_file.lock() = Some(file);
    }

    let parent_space = parent.address_space.lock().clone();
    if let Some(src) = parent_space {
        let arch_space = crate::arch::pagetable::backend();
        let dest = vas::fork(&src, arch_space);
        *child.address_space.lock() = Some(dest);
    }

    *child.fork_ok.lock() = Some(true);
    parent.children.lock().push(tid);
    task::register(child.clone());
    crate::sched::scheduler::make_ready(tid);
    child.sema_fork_complete.up();

    Ok(tid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::fat::FatFs;
    use crate::mm::vas::AddressSpace;
    use crate::mm::VirtualAddress;
    use alloc::string::String;
    use spin::Mutex;

    #[test]
    fn fork_registers_child_as_parents_descendant() {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(String::from("tf"), 4096)));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        crate::fs::mount(fs);

        let ptid = task::alloc_tid();
        let parent = Arc::new(Thread::new(ptid, "parent", PRI_DEFAULT, None));
        let frames = crate::mm::user_frames();
        let space = Arc::new(Mutex::new(AddressSpace::new(
            crate::arch::pagetable::backend(),
            frames,
            VirtualAddress::new(0x8000_0000),
        )));
        *parent.address_space.lock() = Some(space);
        task::register(parent.clone());

        let child_tid = fork(ptid).unwrap();
        assert!(parent.children.lock().contains(&child_tid));
        let child = task::lookup(child_tid).unwrap();
        assert_eq!(child.parent, Some(ptid));

        task::unregister(ptid);
        task::unregister(child_tid);
    }
}
