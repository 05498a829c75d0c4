//! Process/syscall boundary: fork/exec/wait/exit built on the unified
//! [`crate::sched::task::Thread`] instead of a separate PCB, since
//! process and thread are not distinguished here.

extern crate alloc;

pub mod creation;
pub mod exit;
pub mod fork;
pub mod wait;

pub use creation::exec;
pub use exit::exit_current;
pub use fork::fork;
pub use wait::wait;

use alloc::sync::Arc;

use crate::sched::task::{self, Thread, ThreadId};

/// Returns the thread descriptor for whichever thread the scheduler has
/// marked current. `None` before the first thread has been scheduled.
pub fn current_thread() -> Option<Arc<Thread>> {
    crate::sched::scheduler::Scheduler::current().and_then(task::lookup)
}

pub fn current_tid() -> Option<ThreadId> {
    crate::sched::scheduler::Scheduler::current()
}

/// `exec` issued by the currently running thread, i.e. the `exec`
/// syscall's entry point.
pub fn exec_current(cmd_line: &str) -> crate::error::KernelResult<ThreadId> {
    creation::exec(cmd_line, current_tid())
}

/// `fork` issued by the currently running thread, i.e. the `fork`
/// syscall's entry point.
pub fn fork_current() -> crate::error::KernelResult<ThreadId> {
    let tid = current_tid().ok_or(crate::error::KernelError::ThreadNotFound { tid: 0 })?;
    fork::fork(tid)
}

/// `wait` issued by the currently running thread, i.e. the `wait`
/// syscall's entry point.
pub fn wait_current(child_tid: ThreadId) -> crate::error::KernelResult<i32> {
    let tid = current_tid().ok_or(crate::error::KernelError::ThreadNotFound { tid: 0 })?;
    wait::wait(tid, child_tid)
}

/// Boots the first process (spec C10's implicit "init" process): loads
/// `path` from the root filesystem with no parent and no arguments.
pub fn spawn_init(path: &str) -> crate::error::KernelResult<ThreadId> {
    creation::exec_new_process(path, alloc::vec![alloc::string::String::from(path)], None)
}

pub fn init() {
    log::info!("process: subsystem ready");
}
