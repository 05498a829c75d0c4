//! Scheduling subsystem
//!
//! "process" and "thread" are not distinguished: every schedulable
//! entity in `sched::task::Thread` also owns an address space, a
//! file-descriptor table, and parent/child links, exactly as the
//! Data Model describes. The `process` module builds the fork/exec/wait/
//! exit operations (C10) on top of this single type instead of layering a
//! separate PCB the way the teacher's microkernel-flavored `process::pcb`
//! does, since that split does not exist in the system being modeled.

pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use queue::{ReadyQueue, SleepQueue};
pub use scheduler::{SchedPolicy, Scheduler};
pub use sync::{CondVar, Lock, Semaphore};
pub use task::{Thread, ThreadId};

/// State machine for a [`Thread`] (spec.md §4.2.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Blocked,
    Ready,
    Running,
    Dying,
}

pub fn init() {
    log::info!("scheduler: initialized with policy {:?}", SchedPolicy::default());
}
