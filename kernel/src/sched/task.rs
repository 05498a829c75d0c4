//! Thread descriptor and thread table
//!
//! "process" and "thread" are not distinguished here — every schedulable
//! entity here also owns an address space, a file-descriptor table, and
//! parent/child links. `process::` builds fork/exec/wait/exit (C10) on top
//! of this type rather than a separate PCB.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering as AtomicOrdering};

use spin::Mutex;

use crate::config::{PRI_DEFAULT, PRI_MAX, PRI_MIN};
use crate::fixed_point::Fixed;
use crate::fs::fdtable::FdTable;
use crate::mm::vas::AddressSpace;
use crate::sched::sync::Lock;
use crate::sched::ThreadState;
use crate::util::HashTable;

/// Thread/process identifier. Threads and processes share one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_tid() -> ThreadId {
    ThreadId(NEXT_TID.fetch_add(1, AtomicOrdering::Relaxed))
}

/// One (donor thread, lock being donated for) pair, so a release only
/// strips the donations that were made on account of that specific lock.
struct Donation {
    donor: ThreadId,
    lock: Arc<Lock>,
}

/// A thread, a process, and (while it is being torn down) a zombie are
/// kept as one object.
pub struct Thread {
    pub tid: ThreadId,
    pub name: Mutex<alloc::string::String>,
    state: Mutex<ThreadState>,

    base_priority: AtomicU8,
    effective_priority: AtomicU8,
    /// Lock this thread is currently blocked waiting to acquire, if any.
    waiting_on_lock: Mutex<Option<Arc<Lock>>>,
    /// Donations currently boosting this thread's effective priority.
    donations: Mutex<Vec<Donation>>,

    /// MLFQS niceness, user-settable in [-20, 20].
    pub nice: AtomicI32,
    /// MLFQS recent_cpu accumulator, 17.14 fixed point.
    pub recent_cpu: Mutex<Fixed>,

    pub address_space: Mutex<Option<Arc<Mutex<AddressSpace>>>>,
    pub fd_table: Mutex<FdTable>,
    /// Working directory, as a FAT cluster number (spec C11 chdir/mkdir).
    pub cwd: AtomicU32,

    pub parent: Option<ThreadId>,
    pub children: Mutex<Vec<ThreadId>>,

    /// Signaled by the child once its fork outcome (success/failure) is
    /// recorded, so the parent's `fork()` call can return it.
    pub sema_fork_complete: super::sync::Semaphore,
    /// Signaled by the parent's `wait()` to tell the child it may exit,
    /// i.e. the parent is ready to collect the child's exit status.
    pub sema_wait_block: super::sync::Semaphore,
    /// Signaled by the child once its exit status has been published, so
    /// the waiting parent can read it.
    pub sema_exit_ack: super::sync::Semaphore,
    /// Signaled by the parent once it has consumed the exit status (or by
    /// the reaper, if the parent dies first), permitting the thread
    /// descriptor to actually be freed.
    pub sema_free_permit: super::sync::Semaphore,

    pub exit_status: Mutex<Option<i32>>,
    pub fork_ok: Mutex<Option<bool>>,

    /// Executable file kept open (and deny-writed) for the process's own
    /// lifetime, per spec C10.
    pub executing_file: Mutex<Option<Arc<crate::fs::file::File>>>,

    pub time_slice_remaining: AtomicU32,

    /// Entry RIP and RSP a real context switch would load into the
    /// trap frame the first time this thread runs in user mode
    /// (spec C10). Populated by `exec`/`fork`, consumed by the
    /// architecture-specific thread-start path, which is out of scope
    /// here the same way `arch::pagetable` is.
    pub entry_rip: AtomicU64,
    pub entry_rsp: AtomicU64,
}

impl Thread {
    pub fn new(tid: ThreadId, name: &str, priority: u8, parent: Option<ThreadId>) -> Self {
        let priority = priority.clamp(PRI_MIN, PRI_MAX);
        Thread {
            tid,
            name: Mutex::new(alloc::string::String::from(name)),
            state: Mutex::new(ThreadState::Blocked),
            base_priority: AtomicU8::new(priority),
            effective_priority: AtomicU8::new(priority),
            waiting_on_lock: Mutex::new(None),
            donations: Mutex::new(Vec::new()),
            nice: AtomicI32::new(0),
            recent_cpu: Mutex::new(Fixed::ZERO),
            address_space: Mutex::new(None),
            fd_table: Mutex::new(FdTable::new()),
            cwd: AtomicU32::new(0),
            parent,
            children: Mutex::new(Vec::new()),
            sema_fork_complete: super::sync::Semaphore::new(0),
            sema_wait_block: super::sync::Semaphore::new(0),
            sema_exit_ack: super::sync::Semaphore::new(0),
            sema_free_permit: super::sync::Semaphore::new(0),
            exit_status: Mutex::new(None),
            fork_ok: Mutex::new(None),
            executing_file: Mutex::new(None),
            time_slice_remaining: AtomicU32::new(crate::config::TIME_SLICE_TICKS),
            entry_rip: AtomicU64::new(0),
            entry_rsp: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn set_state(&self, s: ThreadState) {
        *self.state.lock() = s;
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority.load(AtomicOrdering::Relaxed)
    }

    pub fn effective_priority(&self) -> u8 {
        self.effective_priority.load(AtomicOrdering::Relaxed)
    }

    /// Sets the base priority directly. Under MLFQS this is a no-op from
    /// the syscall boundary's point of view — callers gate on policy
    /// before reaching here (spec C5 edge case).
    pub fn set_base_priority(&self, p: u8) {
        let p = p.clamp(PRI_MIN, PRI_MAX);
        self.base_priority.store(p, AtomicOrdering::Relaxed);
        self.recompute_effective_priority();
    }

    pub fn waiting_on_lock(&self) -> Option<Arc<Lock>> {
        self.waiting_on_lock.lock().clone()
    }

    pub fn set_waiting_on_lock(&self, lock: Option<Arc<Lock>>) {
        *self.waiting_on_lock.lock() = lock;
    }

    pub fn add_donation(&self, donor: ThreadId, lock: Arc<Lock>) {
        self.donations.lock().push(Donation { donor, lock });
    }

    /// Strips every donation recorded on account of `lock` (spec I3: a
    /// release only undoes the donations it caused).
    pub fn clear_donations_for(&self, lock: &Arc<Lock>) {
        self.donations
            .lock()
            .retain(|d| !Arc::ptr_eq(&d.lock, lock));
    }

    /// `effective = max(base, donors' effective priorities)`. Donors are
    /// resolved live through the thread table, so a donor's own boost is
    /// picked up without needing to re-walk the chain eagerly.
    pub fn recompute_effective_priority(&self) -> u8 {
        let base = self.base_priority();
        let mut best = base;
        for d in self.donations.lock().iter() {
            if let Some(donor) = lookup(d.donor) {
                best = best.max(donor.effective_priority());
            }
        }
        self.effective_priority.store(best, AtomicOrdering::Relaxed);
        best
    }

    /// Under MLFQS, effective priority is recomputed from `recent_cpu`
    /// and `nice` on every recompute tick instead of from donations.
    pub fn recompute_effective_priority_mlfqs(&self) -> u8 {
        let p = self.mlfqs_priority();
        self.effective_priority.store(p, AtomicOrdering::Relaxed);
        p
    }

    pub fn mlfqs_priority(&self) -> u8 {
        // priority = PRI_MAX - (recent_cpu / 4) - (nice * 2), clamped.
        let recent_cpu = *self.recent_cpu.lock();
        let nice = self.nice.load(AtomicOrdering::Relaxed);
        let raw = Fixed::from_int(PRI_MAX as i32) - recent_cpu / 4 - Fixed::from_int(nice * 2);
        raw.to_int_round().clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
    }
}

/// Global thread table, keyed by [`ThreadId`]. Lookups go through a hash
/// table instead of walking an intrusive list.
static THREADS: Mutex<Option<HashTable<ThreadId, Arc<Thread>>>> = Mutex::new(None);

fn with_table<R>(f: impl FnOnce(&mut HashTable<ThreadId, Arc<Thread>>) -> R) -> R {
    let mut guard = THREADS.lock();
    let table = guard.get_or_insert_with(HashTable::new);
    f(table)
}

pub fn register(thread: Arc<Thread>) {
    with_table(|t| {
        t.insert(thread.tid, thread);
    });
}

pub fn lookup(tid: ThreadId) -> Option<Arc<Thread>> {
    with_table(|t| t.get(&tid).cloned())
}

pub fn unregister(tid: ThreadId) -> Option<Arc<Thread>> {
    with_table(|t| t.remove(&tid))
}

/// Visits every registered thread. Used by the MLFQS recompute pass
/// (spec C5), which must touch `recent_cpu`/priority on all threads, not
/// just the ones currently ready or running.
pub fn for_each(mut f: impl FnMut(&Arc<Thread>)) {
    with_table(|t| {
        for (_, v) in t.iter() {
            f(v);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_clamps_priority() {
        let t = Thread::new(alloc_tid(), "over", 255, None);
        assert_eq!(t.base_priority(), PRI_MAX);
        assert_eq!(t.effective_priority(), PRI_MAX);
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let tid = alloc_tid();
        let t = Arc::new(Thread::new(tid, "t", PRI_DEFAULT, None));
        register(t.clone());
        assert!(lookup(tid).is_some());
        unregister(tid);
        assert!(lookup(tid).is_none());
    }

    #[test]
    fn recompute_picks_up_live_donor_boost() {
        let donor_tid = alloc_tid();
        let donor = Arc::new(Thread::new(donor_tid, "donor", 40, None));
        register(donor.clone());

        let holder_tid = alloc_tid();
        let holder = Arc::new(Thread::new(holder_tid, "holder", 10, None));
        let lock = Arc::new(super::super::sync::Lock::new());
        holder.add_donation(donor_tid, lock);
        assert_eq!(holder.recompute_effective_priority(), 40);

        donor.set_base_priority(50);
        assert_eq!(holder.recompute_effective_priority(), 50);

        unregister(donor_tid);
    }
}
