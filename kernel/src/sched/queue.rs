//! Ready queue and sleep queue (spec.md §4.2.3/§4.3)

extern crate alloc;

use crate::sched::task::{self, ThreadId};
use crate::util::List;

/// Threads ready to run, ordered by effective priority (ties broken FIFO).
/// Under MLFQS the scheduler re-sorts by [`task::Thread::mlfqs_priority`]
/// on every recompute tick instead of inserting in order here.
#[derive(Default)]
pub struct ReadyQueue {
    list: List<ThreadId>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        ReadyQueue { list: List::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Inserts in descending effective-priority order, FIFO among equals.
    pub fn push(&mut self, tid: ThreadId) {
        self.list.ordered_insert(tid, |a, b| {
            priority_of(*b).cmp(&priority_of(*a))
        });
    }

    /// Highest-priority runnable thread, if any.
    pub fn pop(&mut self) -> Option<ThreadId> {
        self.list.pop_front()
    }

    /// Re-sorts the whole queue. Called after an MLFQS priority recompute,
    /// since priorities drift every tick instead of only at donation time.
    pub fn resort_mlfqs(&mut self) {
        self.list.sort_by(|a, b| {
            mlfqs_priority_of(*b).cmp(&mlfqs_priority_of(*a))
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadId> {
        self.list.iter()
    }
}

fn priority_of(tid: ThreadId) -> u8 {
    task::lookup(tid).map(|t| t.effective_priority()).unwrap_or(0)
}

fn mlfqs_priority_of(tid: ThreadId) -> u8 {
    task::lookup(tid).map(|t| t.mlfqs_priority()).unwrap_or(0)
}

/// Threads blocked in `timer_sleep`, ordered by wake-up tick so the timer
/// interrupt handler can check only the head instead of scanning every
/// sleeper (spec §4.3 edge case: O(1) "is anyone due" check).
#[derive(Default)]
pub struct SleepQueue {
    list: List<(ThreadId, u64)>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        SleepQueue { list: List::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn sleep_until(&mut self, tid: ThreadId, wake_tick: u64) {
        self.list.ordered_insert((tid, wake_tick), |a, b| a.1.cmp(&b.1));
    }

    /// Earliest tick at which any sleeper should be woken.
    pub fn next_wakeup(&self) -> Option<u64> {
        self.list.front().map(|(_, t)| *t)
    }

    /// Pops every sleeper due at or before `now`.
    pub fn wake_due(&mut self, now: u64) -> alloc::vec::Vec<ThreadId> {
        let mut woken = alloc::vec::Vec::new();
        while matches!(self.list.front(), Some((_, t)) if *t <= now) {
            if let Some((tid, _)) = self.list.pop_front() {
                woken.push(tid);
            }
        }
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_orders_by_priority() {
        let mut q = ReadyQueue::new();
        // No registered threads: priority_of defaults to 0 for all, so
        // push order is preserved (FIFO among equals).
        q.push(ThreadId(1));
        q.push(ThreadId(2));
        q.push(ThreadId(3));
        assert_eq!(q.pop(), Some(ThreadId(1)));
        assert_eq!(q.pop(), Some(ThreadId(2)));
        assert_eq!(q.pop(), Some(ThreadId(3)));
    }

    #[test]
    fn sleep_queue_wakes_due_sleepers_in_order() {
        let mut sq = SleepQueue::new();
        sq.sleep_until(ThreadId(1), 100);
        sq.sleep_until(ThreadId(2), 50);
        sq.sleep_until(ThreadId(3), 150);
        assert_eq!(sq.next_wakeup(), Some(50));
        let woken = sq.wake_due(100);
        assert_eq!(woken, alloc::vec![ThreadId(2), ThreadId(1)]);
        assert_eq!(sq.next_wakeup(), Some(150));
    }
}
