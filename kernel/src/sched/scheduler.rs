//! Scheduler core (spec component F).
//!
//! State machine: nascent -> runnable -> running -> {runnable | blocked |
//! exiting}. One global run queue, one "current thread" pointer. The
//! critical correctness property is that `block_on` never loses a wakeup:
//! the closure that links the thread onto a wait list runs with
//! interrupts disabled and the thread's state set to `Blocked` *before*
//! `schedule()` can hand the CPU to anyone else, so an `unblock` racing
//! in from an interrupt handler always sees a consistent state.

use core::ptr::NonNull;

use spin::Mutex;

use crate::arch;
use crate::arch::context::{switch_to, KernelContext};
use crate::arch::gdt;
use crate::process::tcb::{Tcb, ThreadState};
use crate::sched::queue::RunQueue;

static RUN_QUEUE: RunQueue = RunQueue::new();
static CURRENT: Mutex<Option<NonNull<Tcb>>> = Mutex::new(None);

/// Install the first thread as `current` without going through the run
/// queue (there is nothing to switch away from yet).
pub fn init(first: NonNull<Tcb>) {
    // SAFETY: called once at boot, before any interrupt can observe
    // inconsistent scheduler state.
    unsafe {
        (*first.as_ptr()).state = ThreadState::Running;
    }
    *CURRENT.lock() = Some(first);
}

pub fn current() -> NonNull<Tcb> {
    CURRENT.lock().expect("scheduler not initialized")
}

/// Put `t` on the tail of the run queue and mark it runnable. Safe to call
/// from interrupt context (e.g. a timer-driven sleep-queue wakeup).
pub fn unblock(t: NonNull<Tcb>) {
    // SAFETY: caller guarantees `t` is not already queued or running
    // elsewhere; `Blocked` is the only state unblock is called from.
    unsafe {
        debug_assert_eq!((*t.as_ptr()).state, ThreadState::Blocked);
        (*t.as_ptr()).state = ThreadState::Runnable;
    }
    RUN_QUEUE.push_back(t);
}

pub fn enqueue_new(t: NonNull<Tcb>) {
    // SAFETY: caller just constructed `t` via Tcb::new; state is Nascent.
    unsafe {
        (*t.as_ptr()).state = ThreadState::Runnable;
    }
    RUN_QUEUE.push_back(t);
}

/// Block the current thread, running `prepare` (typically: push onto a
/// wait list, release the lock protecting that list) atomically with the
/// state transition to `Blocked`. Generalizes the `do_and_block` family:
/// `sched_spin_unlock_and_block`, `sched_mutex_unlock_and_block`, and a
/// plain `sched_block` are all `block_on` with different `prepare`
/// closures.
pub fn block_on<F: FnOnce()>(prepare: F) {
    let _guard = arch::disable_interrupts();
    let cur = current();
    // SAFETY: only the currently running thread mutates its own state here;
    // interrupts are off for the duration.
    unsafe {
        (*cur.as_ptr()).state = ThreadState::Blocked;
    }
    prepare();
    schedule();
}

pub fn block() {
    block_on(|| {});
}

/// Block the current thread off every wait list, for `deschedule`
/// (component J). Kept as a distinct state from `Blocked` so
/// `make_runnable` can't be used to force a thread out of a mutex/cvar/
/// sleep wait out from under that structure's own bookkeeping.
pub fn block_descheduled() {
    let _guard = arch::disable_interrupts();
    let cur = current();
    // SAFETY: only the currently running thread mutates its own state
    // here; interrupts are off for the duration.
    unsafe {
        (*cur.as_ptr()).state = ThreadState::Descheduled;
    }
    schedule();
}

/// Resume a thread previously blocked by `block_descheduled`. Returns
/// `false` (no-op) if `t` is not currently in that exact state, e.g. it
/// never called `deschedule`, or already got a concurrent `make_runnable`.
pub fn make_runnable(t: NonNull<Tcb>) -> bool {
    let _guard = arch::disable_interrupts();
    // SAFETY: `t` is a live table-owned Tcb; the state check/update is
    // atomic with respect to the rest of the scheduler since interrupts
    // are off and this is a single-CPU kernel.
    unsafe {
        if (*t.as_ptr()).state != ThreadState::Descheduled {
            return false;
        }
        (*t.as_ptr()).state = ThreadState::Runnable;
    }
    RUN_QUEUE.push_back(t);
    true
}

/// Voluntarily give up the CPU without blocking: re-enqueue self, pick
/// whoever's next (possibly self again if nothing else is runnable).
pub fn yield_now() {
    let _guard = arch::disable_interrupts();
    let cur = current();
    // SAFETY: only touched by the running thread, interrupts off.
    unsafe {
        (*cur.as_ptr()).state = ThreadState::Runnable;
    }
    RUN_QUEUE.push_back(cur);
    schedule();
}

/// Dequeue the next runnable thread and switch to it. If the run queue is
/// momentarily empty (every other thread blocked), idles until the next
/// interrupt makes someone runnable and retries. No-op if the chosen
/// thread is already current (avoids a pointless self-switch).
///
/// Must be called with interrupts disabled; `schedule` itself briefly
/// re-enables them only while idling, never across a context switch.
pub fn schedule() {
    loop {
        if let Some(next) = RUN_QUEUE.pop_front() {
            dispatch(next);
            return;
        }
        arch::enable_interrupts();
        arch::idle();
        arch::cli();
    }
}

fn dispatch(next: NonNull<Tcb>) {
    let prev = current();
    if prev == next {
        // SAFETY: single-threaded access under the scheduler's interrupt-off
        // invariant.
        unsafe { (*next.as_ptr()).state = ThreadState::Running };
        return;
    }

    *CURRENT.lock() = Some(next);
    // SAFETY: prev/next are both valid Tcb pointers owned by process::table
    // for the lifetime of this switch; prev was Running, Blocked, or
    // Exiting (set by the caller before calling schedule), next was
    // Runnable.
    unsafe {
        (*next.as_ptr()).state = ThreadState::Running;
        gdt::set_kernel_stack((*next.as_ptr()).kernel_stack_top());
        let next_cr3 = (*next.as_ptr()).task.as_ref().address_space.lock().cr3();
        arch::write_cr3(next_cr3);

        let prev_ctx: *mut KernelContext = &mut (*prev.as_ptr()).context;
        let next_ctx: *const KernelContext = &(*next.as_ptr()).context;
        switch_to(prev_ctx, next_ctx);
    }
}

/// Called by the timer ISR once per tick: re-enqueues the current thread
/// and picks the next one, implementing the single preemption point named
/// in spec component H.
pub fn timer_preempt() {
    let cur = current();
    // SAFETY: called from the timer ISR, which runs with interrupts
    // already disabled by the trap gate.
    unsafe {
        (*cur.as_ptr()).state = ThreadState::Runnable;
    }
    RUN_QUEUE.push_back(cur);
    schedule();
}
