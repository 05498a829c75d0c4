//! Synchronization primitives with priority donation
//!
//! Built on the handle-indexed thread table: `Semaphore` keeps a
//! priority-ordered waiter list, `Lock` is a semaphore plus a holder and
//! the donation bookkeeping, `CondVar` is a list of private one-shot
//! semaphores — since locks are already semaphores, condition variables
//! wait on a semaphore each.

extern crate alloc;

use alloc::sync::Arc;

use crate::config::MAX_DONATION_DEPTH;
use crate::sched::scheduler;
use crate::sched::task::{self, ThreadId};
use crate::sched::ThreadState;
use crate::util::List;

/// Counting semaphore with waiters released in effective-priority order.
pub struct Semaphore {
    inner: spin::Mutex<SemaphoreInner>,
}

struct SemaphoreInner {
    value: u32,
    waiters: List<ThreadId>,
}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        Semaphore {
            inner: spin::Mutex::new(SemaphoreInner {
                value,
                waiters: List::new(),
            }),
        }
    }

    pub fn value(&self) -> u32 {
        self.inner.lock().value
    }

    /// P operation. Blocks the caller if the count is zero.
    pub fn down(&self) {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            return;
        }
        let me = scheduler::current_tid().expect("down() called with no current thread");
        inner
            .waiters
            .ordered_insert(me, |a, b| priority_of(*b).cmp(&priority_of(*a)));
        drop(inner);
        // `up()` moves the waiter straight to Ready and decrements on our
        // behalf; blocking here just yields the CPU until that happens.
        scheduler::block_current(ThreadState::Blocked);
    }

    /// V operation. Wakes the highest-priority waiter, if any, else
    /// increments the count. Re-sorts the waiter list first since a
    /// waiter's effective priority may have changed via donation while it
    /// slept.
    pub fn up(&self) {
        let mut inner = self.inner.lock();
        inner.waiters.sort_by(|a, b| priority_of(*b).cmp(&priority_of(*a)));
        match inner.waiters.pop_front() {
            Some(tid) => {
                drop(inner);
                scheduler::make_ready(tid);
                scheduler::maybe_preempt(tid);
            }
            None => {
                inner.value += 1;
            }
        }
    }
}

fn priority_of(tid: ThreadId) -> u8 {
    task::lookup(tid).map(|t| t.effective_priority()).unwrap_or(0)
}

/// Mutual-exclusion lock built on a binary semaphore, with priority
/// donation (spec I3: donation is transitive up to [`MAX_DONATION_DEPTH`]
/// hops, and a release undoes only the donations it caused).
pub struct Lock {
    sema: Semaphore,
    holder: spin::Mutex<Option<ThreadId>>,
}

impl Lock {
    pub fn new() -> Self {
        Lock {
            sema: Semaphore::new(1),
            holder: spin::Mutex::new(None),
        }
    }

    pub fn is_held_by_current(&self) -> bool {
        *self.holder.lock() == scheduler::current_tid()
    }

    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquires `lock`, donating the caller's effective priority up the chain
/// of threads it transitively waits behind.
pub fn lock_acquire(lock: &Arc<Lock>) {
    let me = scheduler::current_tid().expect("lock_acquire() called with no current thread");
    if let Some(holder) = lock.holder() {
        assert!(holder != me, "lock: reentrant acquire by thread {:?}", me);
        if let Some(me_thread) = task::lookup(me) {
            me_thread.set_waiting_on_lock(Some(lock.clone()));
        }
        if let Some(holder_thread) = task::lookup(holder) {
            holder_thread.add_donation(me, lock.clone());
        }
        propagate_donation(holder);
    }
    lock.sema.down();
    *lock.holder.lock() = Some(me);
    if let Some(me_thread) = task::lookup(me) {
        me_thread.set_waiting_on_lock(None);
    }
}

/// Releases `lock`, stripping the donations it caused from the releaser
/// and restoring its effective priority to whatever remains.
pub fn lock_release(lock: &Arc<Lock>) {
    let me = scheduler::current_tid().expect("lock_release() called with no current thread");
    assert_eq!(lock.holder(), Some(me), "lock: release by non-holder");
    *lock.holder.lock() = None;
    if let Some(me_thread) = task::lookup(me) {
        me_thread.clear_donations_for(lock);
        me_thread.recompute_effective_priority();
    }
    lock.sema.up();
}

/// Recomputes effective priority along the "waiting for a lock held by"
/// chain starting at `start`, capped at [`MAX_DONATION_DEPTH`] hops.
fn propagate_donation(start: ThreadId) {
    let mut current = start;
    for _ in 0..MAX_DONATION_DEPTH {
        let thread = match task::lookup(current) {
            Some(t) => t,
            None => return,
        };
        thread.recompute_effective_priority();
        match thread.waiting_on_lock() {
            Some(next_lock) => match next_lock.holder() {
                Some(next_holder) => current = next_holder,
                None => return,
            },
            None => return,
        }
    }
}

/// A condition variable, implemented as a list of private one-shot
/// semaphores rather than a waiter list of its own. Waiters are tagged
/// with the thread id that enqueued them so `signal`/`broadcast` can wake
/// in effective-priority order, the same as [`Semaphore::up`].
pub struct CondVar {
    waiters: spin::Mutex<List<(ThreadId, Arc<Semaphore>)>>,
}

impl CondVar {
    pub fn new() -> Self {
        CondVar {
            waiters: spin::Mutex::new(List::new()),
        }
    }

    /// Atomically releases `lock`, waits to be signaled, then reacquires
    /// it. The caller must already hold `lock`.
    pub fn wait(&self, lock: &Arc<Lock>) {
        let me = scheduler::current_tid().expect("wait() called with no current thread");
        let my_sema = Arc::new(Semaphore::new(0));
        self.waiters
            .lock()
            .ordered_insert((me, my_sema.clone()), |a, b| priority_of(b.0).cmp(&priority_of(a.0)));
        lock_release(lock);
        my_sema.down();
        lock_acquire(lock);
    }

    /// Wakes the highest-priority waiter, if any. Re-sorts first since a
    /// waiter's effective priority may have changed via donation while it
    /// slept.
    pub fn signal(&self) {
        let mut waiters = self.waiters.lock();
        waiters.sort_by(|a, b| priority_of(b.0).cmp(&priority_of(a.0)));
        let front = waiters.pop_front();
        drop(waiters);
        if let Some((_, sema)) = front {
            sema.up();
        }
    }

    /// Wakes every waiter, highest priority first.
    pub fn broadcast(&self) {
        loop {
            let mut waiters = self.waiters.lock();
            waiters.sort_by(|a, b| priority_of(b.0).cmp(&priority_of(a.0)));
            let front = waiters.pop_front();
            drop(waiters);
            match front {
                Some((_, sema)) => sema.up(),
                None => break,
            }
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_down_up_without_blocking() {
        let s = Semaphore::new(1);
        s.down();
        assert_eq!(s.value(), 0);
        s.up();
        assert_eq!(s.value(), 1);
    }

    #[test]
    fn lock_starts_unheld() {
        let l = Lock::new();
        assert!(l.holder().is_none());
    }

    #[test]
    fn condvar_signal_wakes_highest_priority_waiter() {
        let low_tid = task::alloc_tid();
        task::register(Arc::new(task::Thread::new(low_tid, "low", 10, None)));
        let high_tid = task::alloc_tid();
        task::register(Arc::new(task::Thread::new(high_tid, "high", 50, None)));

        let cv = CondVar::new();
        let low_sema = Arc::new(Semaphore::new(0));
        let high_sema = Arc::new(Semaphore::new(0));
        // Enqueue the low-priority waiter first, as if it called wait()
        // before the high-priority one did.
        cv.waiters
            .lock()
            .ordered_insert((low_tid, low_sema.clone()), |a, b| {
                priority_of(b.0).cmp(&priority_of(a.0))
            });
        cv.waiters
            .lock()
            .ordered_insert((high_tid, high_sema.clone()), |a, b| {
                priority_of(b.0).cmp(&priority_of(a.0))
            });

        cv.signal();

        assert_eq!(high_sema.value(), 1, "higher-priority waiter should be woken first");
        assert_eq!(low_sema.value(), 0);

        task::unregister(low_tid);
        task::unregister(high_tid);
    }
}
