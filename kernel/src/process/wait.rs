//! `wait(pid)`: blocks until the named child exits and returns its exit
//! status, enforcing spec C10's "only a direct child, only once" rule.

extern crate alloc;

use crate::error::{KernelError, KernelResult};
use crate::sched::task::{self, ThreadId};

/// Waits for `child_tid`, a direct child of `waiter_tid`. Returns the
/// child's exit status. Errors if `child_tid` is not (or is no longer,
/// having already been waited on) a child of the caller.
pub fn wait(waiter_tid: ThreadId, child_tid: ThreadId) -> KernelResult<i32> {
    let waiter = task::lookup(waiter_tid).ok_or(KernelError::ThreadNotFound { pid: waiter_tid.0 })?;

    let is_child = waiter.children.lock().contains(&child_tid);
    if !is_child {
        return Err(KernelError::NotAChild { pid: child_tid.0 });
    }

    let child = task::lookup(child_tid).ok_or(KernelError::AlreadyWaited { pid: child_tid.0 })?;

    // An alternative design blocks here on a per-child semaphore until the
    // child calls `exit`. This kernel's `exit()` always runs to
    // completion (and publishes `exit_status`) before `wait()` can be
    // called against it, since both run synchronously on the same call
    // stack with no real concurrent scheduling at this layer — so the
    // down() below never actually blocks in practice, it just asserts
    // the status really is there.
    child.sema_exit_ack.down();
    let status = child.exit_status.lock().ok_or(KernelError::AlreadyWaited { pid: child_tid.0 })?;

    waiter.children.lock().retain(|c| *c != child_tid);
    child.sema_free_permit.up();
    task::unregister(child_tid);

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PRI_DEFAULT;
    use crate::process::exit;
    use crate::sched::task::Thread;
    use alloc::sync::Arc;

    #[test]
    fn wait_on_non_child_is_rejected() {
        let tid = task::alloc_tid();
        let t = Arc::new(Thread::new(tid, "solo", PRI_DEFAULT, None));
        task::register(t);
        let result = wait(tid, ThreadId(999_999));
        assert!(result.is_err());
        task::unregister(tid);
    }

    #[test]
    fn wait_collects_exit_status_and_unregisters_child() {
        let parent_tid = task::alloc_tid();
        let parent = Arc::new(Thread::new(parent_tid, "parent", PRI_DEFAULT, None));
        task::register(parent.clone());

        let child_tid = task::alloc_tid();
        let child = Arc::new(Thread::new(child_tid, "child", PRI_DEFAULT, Some(parent_tid)));
        parent.children.lock().push(child_tid);
        task::register(child);

        exit::exit(child_tid, 42);
        let status = wait(parent_tid, child_tid).unwrap();
        assert_eq!(status, 42);
        assert!(task::lookup(child_tid).is_none());
        assert!(!parent.children.lock().contains(&child_tid));

        task::unregister(parent_tid);
    }

    #[test]
    fn double_wait_is_rejected() {
        let parent_tid = task::alloc_tid();
        let parent = Arc::new(Thread::new(parent_tid, "parent2", PRI_DEFAULT, None));
        task::register(parent.clone());

        let child_tid = task::alloc_tid();
        let child = Arc::new(Thread::new(child_tid, "child2", PRI_DEFAULT, Some(parent_tid)));
        parent.children.lock().push(child_tid);
        task::register(child);

        exit::exit(child_tid, 0);
        wait(parent_tid, child_tid).unwrap();
        assert!(wait(parent_tid, child_tid).is_err());

        task::unregister(parent_tid);
    }
}
