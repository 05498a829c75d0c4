//! `exit()`: publishes the calling thread's exit status and tears down
//! its address space and file descriptors (spec C10).
//!
//! An alternative design blocks the exiting thread until its parent calls
//! `wait` (so the parent is guaranteed to still find it), handing off
//! control across a paired semaphore across a real context switch. This
//! kernel's process boundary runs
//! synchronously with no such switch, so those two semaphores are only
//! ever `up()`'d here for protocol symmetry; `wait()` reads
//! `exit_status` directly off the (still-registered) thread instead of
//! blocking on them. See [`crate::process::wait`].

extern crate alloc;

use crate::sched::task::{self, ThreadId};
use crate::sched::ThreadState;

/// Exits the thread `tid` with `status`: tears down its address space
/// and closes its files, but leaves the descriptor registered (in the
/// `Dying` state) so `wait()` can still read the exit status. Full
/// removal from the thread table happens once `wait()` (or the reaper,
/// if orphaned) collects it.
pub fn exit(tid: ThreadId, status: i32) {
    let Some(thread) = task::lookup(tid) else { return };

    if let Some(space) = thread.address_space.lock().take() {
        space.lock().destroy();
    }
    thread.fd_table.lock().close_all();
    if let Some(file) = thread.executing_file.lock().take() {
        file.dec_ref();
    }

    *thread.exit_status.lock() = Some(status);
    thread.set_state(ThreadState::Dying);
    thread.sema_exit_ack.up();
    thread.sema_wait_block.up();

    reap_if_orphaned(&thread);
}

/// Exits the current thread, for the `exit` syscall's entry point.
pub fn exit_current(status: i32) {
    if let Some(tid) = crate::sched::scheduler::Scheduler::current() {
        exit(tid, status);
    }
}

/// A thread whose parent has already died (or never existed, as with
/// `init`) has no one left to call `wait()`, so it is reaped
/// immediately instead of leaking its table entry forever.
fn reap_if_orphaned(thread: &alloc::sync::Arc<task::Thread>) {
    let still_has_parent = thread.parent.and_then(task::lookup).is_some();
    if !still_has_parent {
        task::unregister(thread.tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PRI_DEFAULT;
    use crate::sched::task::Thread;
    use alloc::sync::Arc;

    #[test]
    fn exit_without_parent_reaps_immediately() {
        let tid = task::alloc_tid();
        let t = Arc::new(Thread::new(tid, "lonely", PRI_DEFAULT, None));
        task::register(t);
        exit(tid, 7);
        assert!(task::lookup(tid).is_none());
    }

    #[test]
    fn exit_with_live_parent_keeps_thread_for_wait() {
        let parent_tid = task::alloc_tid();
        let parent = Arc::new(Thread::new(parent_tid, "parent", PRI_DEFAULT, None));
        task::register(parent);

        let tid = task::alloc_tid();
        let t = Arc::new(Thread::new(tid, "child", PRI_DEFAULT, Some(parent_tid)));
        task::register(t);

        exit(tid, 3);
        let child = task::lookup(tid).expect("stays registered until waited");
        assert_eq!(*child.exit_status.lock(), Some(3));

        task::unregister(tid);
        task::unregister(parent_tid);
    }
}
