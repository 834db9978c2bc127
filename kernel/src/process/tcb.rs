//! Thread control block (spec component I, thread half).
//!
//! A `Tcb` is the unit the scheduler moves between run queue, a single
//! wait list, and "running". It owns one kernel stack for its entire
//! lifetime and is allocated once by `process::table` and never moved;
//! the scheduler and every wait list address it through `NonNull<Tcb>`.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::boxed::Box;

use crate::arch::context::KernelContext;
use crate::process::task::Task;
use crate::util::list::Link;

pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Allocated but not yet handed to the scheduler (between `thread_fork`
    /// setup and its first `schedule()` appearance).
    Nascent,
    /// On the run queue, waiting for the CPU.
    Runnable,
    /// Currently executing.
    Running,
    /// Off the run queue, linked into exactly one wait list (mutex, cvar,
    /// semaphore, sleep queue, or a task's zombie-wait cvar).
    Blocked,
    /// Off the run queue via `deschedule`, on no wait list at all. Kept
    /// distinct from `Blocked` so `make_runnable` can only ever resume a
    /// thread that actually called `deschedule`, not one a mutex/cvar/
    /// sleep queue still owns.
    Descheduled,
    /// Ran `vanish`; everything but the TCB and exit bookkeeping has been
    /// torn down. Reaped when a sibling or the scheduler next passes over
    /// the "most-recently-dead" slot.
    Exiting,
}

#[repr(align(16))]
struct StackStorage([u8; KERNEL_STACK_SIZE]);

pub struct Tcb {
    pub id: ThreadId,
    pub task: NonNull<Task>,
    pub context: KernelContext,
    stack: Box<StackStorage>,
    pub state: ThreadState,
    /// Link used by exactly one of: the run queue, a sleep-queue entry, or
    /// a mutex/cvar/semaphore wait list. A thread is never in two lists at
    /// once, so one embedded link suffices.
    pub link: Link,
    /// Set by `kill`/a fatal fault; checked on the way back to user mode
    /// so the thread vanishes instead of resuming. Sticky once set.
    pub killed: AtomicBool,
    pub swexn: Option<SwexnHandler>,
}

/// One-shot user exception handler registered via `swexn` (component K).
#[derive(Debug, Clone, Copy)]
pub struct SwexnHandler {
    pub handler_eip: u32,
    pub handler_esp: u32,
    pub arg: u32,
}

impl Tcb {
    pub fn new(id: ThreadId, task: NonNull<Task>, entry: extern "C" fn(u32) -> !, arg: u32) -> Box<Self> {
        let mut stack = Box::new(StackStorage([0; KERNEL_STACK_SIZE]));
        let stack_top = (stack.0.as_mut_ptr() as u32) + KERNEL_STACK_SIZE as u32;
        let context = KernelContext::seed_entry(stack_top, entry, arg);
        Box::new(Tcb {
            id,
            task,
            context,
            stack,
            state: ThreadState::Nascent,
            link: Link::new(),
            killed: AtomicBool::new(false),
            swexn: None,
        })
    }

    pub fn kernel_stack_top(&self) -> u32 {
        (self.stack.0.as_ptr() as u32) + KERNEL_STACK_SIZE as u32
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    /// Mark killed. Sticky: once set it is never cleared (design decision,
    /// see DESIGN.md on the status-of-a-killed-thread open question).
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry(_arg: u32) -> ! {
        loop {}
    }

    #[test]
    fn kill_flag_is_sticky() {
        let task = Box::leak(Box::new(Task::new_for_test(crate::process::task::TaskId(1))));
        let tcb = Tcb::new(ThreadId(1), NonNull::from(&*task), dummy_entry, 0);
        assert!(!tcb.is_killed());
        tcb.kill();
        assert!(tcb.is_killed());
        tcb.kill();
        assert!(tcb.is_killed());
    }
}
