//! Thread scheduler: priority-with-donation and MLFQS policies (spec.md C5)
//!
//! Single-CPU only (spec Non-goal: SMP). `schedule()` and `tick()` are the
//! two entry points a timer interrupt and a blocking primitive call into;
//! everything else here is bookkeeping on the ready/sleep queues and the
//! thread table. The actual register-state context switch is the
//! `arch::context` collaborator's job — out of scope here.

extern crate alloc;

use core::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use spin::Mutex;

use crate::config::{NICE_MAX, NICE_MIN, TIMER_FREQ, TIME_SLICE_TICKS};
use crate::fixed_point::Fixed;
use crate::sched::queue::{ReadyQueue, SleepQueue};
use crate::sched::task::{self, ThreadId};
use crate::sched::ThreadState;

/// Which algorithm governs `pick_next` and priority updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Strict priority scheduling with donation (spec C3/C4).
    Priority,
    /// 4.4BSD-style multi-level feedback queue (spec C5).
    Mlfqs,
}

impl Default for SchedPolicy {
    fn default() -> Self {
        SchedPolicy::Priority
    }
}

static POLICY: Mutex<SchedPolicy> = Mutex::new(SchedPolicy::Priority);
static CURRENT: Mutex<Option<ThreadId>> = Mutex::new(None);
static IDLE: Mutex<Option<ThreadId>> = Mutex::new(None);
static READY: Mutex<ReadyQueue> = Mutex::new(ReadyQueue::new());
static SLEEP: Mutex<SleepQueue> = Mutex::new(SleepQueue::new());
/// System-wide load average, 17.14 fixed point (spec §4.7).
static LOAD_AVG: Mutex<Fixed> = Mutex::new(Fixed::ZERO);
static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn set_policy(policy: SchedPolicy) {
    *POLICY.lock() = policy;
}

pub fn policy() -> SchedPolicy {
    *POLICY.lock()
}

pub fn current_tid() -> Option<ThreadId> {
    *CURRENT.lock()
}

pub fn set_idle_thread(tid: ThreadId) {
    *IDLE.lock() = Some(tid);
}

/// Marks `tid` ready to run and enqueues it.
pub fn make_ready(tid: ThreadId) {
    if let Some(t) = task::lookup(tid) {
        t.set_state(ThreadState::Ready);
    }
    READY.lock().push(tid);
}

/// Blocks the currently running thread with the given state (always
/// [`ThreadState::Blocked`] in practice; kept as a parameter so callers
/// document their reason) and hands the CPU to the next ready thread.
pub fn block_current(state: ThreadState) {
    if let Some(tid) = current_tid() {
        if let Some(t) = task::lookup(tid) {
            t.set_state(state);
        }
    }
    schedule();
}

/// If `candidate` now outranks the running thread, switches to it
/// immediately instead of waiting for the next tick (spec C4: releasing a
/// lock preempts in favor of a higher-priority waiter).
pub fn maybe_preempt(candidate: ThreadId) {
    let candidate_priority = task::lookup(candidate)
        .map(|t| t.effective_priority())
        .unwrap_or(0);
    let current_priority = current_tid()
        .and_then(task::lookup)
        .map(|t| t.effective_priority())
        .unwrap_or(0);
    if candidate_priority > current_priority {
        schedule();
    }
}

fn pick_next() -> Option<ThreadId> {
    let mut ready = READY.lock();
    if policy() == SchedPolicy::Mlfqs {
        ready.resort_mlfqs();
    }
    ready.pop()
}

/// Picks the next thread to run and makes it current. If the previously
/// running thread is still [`ThreadState::Running`] (i.e. it wasn't
/// blocked or exited), it goes back on the ready queue first.
pub fn schedule() {
    let prev = current_tid();
    if let Some(tid) = prev {
        if let Some(t) = task::lookup(tid) {
            if t.state() == ThreadState::Running {
                make_ready(tid);
            }
        }
    }

    let next = pick_next().or_else(|| *IDLE.lock());
    if let Some(tid) = next {
        if let Some(t) = task::lookup(tid) {
            t.set_state(ThreadState::Running);
            t.time_slice_remaining
                .store(TIME_SLICE_TICKS, AtomicOrdering::Relaxed);
        }
    }
    *CURRENT.lock() = next;
}

pub fn sleep_current_until(wake_tick: u64) {
    if let Some(tid) = current_tid() {
        SLEEP.lock().sleep_until(tid, wake_tick);
    }
    block_current(ThreadState::Blocked);
}

/// Timer interrupt entry point. Advances the tick counter, wakes due
/// sleepers, runs the MLFQS recompute cadence, and preempts on time-slice
/// exhaustion.
pub fn tick() {
    let now = TICKS.fetch_add(1, AtomicOrdering::Relaxed) + 1;

    for tid in SLEEP.lock().wake_due(now) {
        make_ready(tid);
    }

    if policy() == SchedPolicy::Mlfqs {
        if let Some(tid) = current_tid() {
            if let Some(t) = task::lookup(tid) {
                let mut recent = t.recent_cpu.lock();
                *recent = *recent + Fixed::from_int(1);
            }
        }
        if now % TIMER_FREQ == 0 {
            recompute_load_avg_and_recent_cpu();
        }
        if now % (TIME_SLICE_TICKS as u64) == 0 {
            recompute_mlfqs_priorities();
        }
    }

    if let Some(tid) = current_tid() {
        if let Some(t) = task::lookup(tid) {
            let remaining = t.time_slice_remaining.fetch_sub(1, AtomicOrdering::Relaxed);
            if remaining <= 1 {
                schedule();
            }
        }
    }
}

/// `load_avg = (59/60) * load_avg + (1/60) * ready_threads`, and for every
/// thread `recent_cpu = (2*load_avg)/(2*load_avg+1) * recent_cpu + nice`
/// (spec §4.7, ported from `original_source/threads/thread.c`).
fn recompute_load_avg_and_recent_cpu() {
    let ready_count = READY.lock().len() as i32;
    let running_bonus = if current_tid().is_some() { 1 } else { 0 };
    let ready_threads = ready_count + running_bonus;

    let load_avg = {
        let mut guard = LOAD_AVG.lock();
        let fifty_nine_sixtieths = Fixed::from_int(59) / Fixed::from_int(60);
        let one_sixtieth = Fixed::from_int(1) / Fixed::from_int(60);
        *guard = fifty_nine_sixtieths * *guard + one_sixtieth * ready_threads;
        *guard
    };

    let coeff = (load_avg * 2) / (load_avg * 2 + Fixed::from_int(1));
    task::for_each(|t| {
        let nice = t.nice.load(AtomicOrdering::Relaxed);
        let mut recent = t.recent_cpu.lock();
        *recent = coeff * *recent + Fixed::from_int(nice);
    });
}

fn recompute_mlfqs_priorities() {
    task::for_each(|t| {
        t.recompute_effective_priority_mlfqs();
    });
}

pub fn set_nice(tid: ThreadId, nice: i32) {
    let nice = nice.clamp(NICE_MIN, NICE_MAX);
    if let Some(t) = task::lookup(tid) {
        t.nice.store(nice, AtomicOrdering::Relaxed);
        t.recompute_effective_priority_mlfqs();
        maybe_preempt(tid);
    }
}

pub fn get_load_avg() -> Fixed {
    *LOAD_AVG.lock()
}

/// Thin handle exposing the scheduler's entry points as associated
/// functions, for call sites that prefer `Scheduler::tick()` to the bare
/// free function.
pub struct Scheduler;

impl Scheduler {
    pub fn schedule() {
        schedule()
    }

    pub fn tick() {
        tick()
    }

    pub fn policy() -> SchedPolicy {
        policy()
    }

    pub fn set_policy(policy: SchedPolicy) {
        set_policy(policy)
    }

    pub fn current() -> Option<ThreadId> {
        current_tid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::task::Thread;
    use alloc::sync::Arc;

    fn fresh_thread(priority: u8) -> ThreadId {
        let tid = task::alloc_tid();
        let t = Arc::new(Thread::new(tid, "t", priority, None));
        t.set_state(ThreadState::Ready);
        task::register(t);
        tid
    }

    #[test]
    fn higher_priority_runs_first() {
        set_policy(SchedPolicy::Priority);
        let low = fresh_thread(30);
        let high = fresh_thread(50);
        let mid = fresh_thread(40);
        make_ready(low);
        make_ready(high);
        make_ready(mid);
        schedule();
        assert_eq!(current_tid(), Some(high));
        task::unregister(low);
        task::unregister(high);
        task::unregister(mid);
    }

    #[test]
    fn ties_broken_fifo() {
        set_policy(SchedPolicy::Priority);
        let a = fresh_thread(20);
        let b = fresh_thread(20);
        make_ready(a);
        make_ready(b);
        schedule();
        assert_eq!(current_tid(), Some(a));
        task::unregister(a);
        task::unregister(b);
    }
}
