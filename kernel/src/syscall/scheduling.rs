//! `gettid`/`yield`/`deschedule`/`make_runnable` (spec component F's
//! syscall surface).

use crate::mm::user_validation::copy_from_user;
use crate::process::table;
use crate::process::tcb::ThreadId;
use crate::sched;

pub fn sys_gettid() -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread.
    unsafe { cur.as_ref().id.0 as i32 }
}

/// `yield(tid)`: `tid == -1` means "let the scheduler pick"; any other
/// value must name a thread currently in the table. Either way this
/// kernel has only one run-queue-wide `yield_now`, so a specific target
/// is validated but not steered to directly.
pub fn sys_yield(args: [u32; 4]) -> i32 {
    let target = args[0] as i32;
    if target != -1 && table::get_thread(ThreadId(target as u32)).is_none() {
        return -1;
    }
    sched::yield_now();
    0
}

/// `deschedule(reject)`: reads the word at `reject`; if non-zero, returns
/// immediately (the caller's own race-avoidance check already failed),
/// otherwise blocks until a `make_runnable` targets this thread.
pub fn sys_deschedule(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    let mut reject = [0u8; 4];
    if copy_from_user(task, args[0], &mut reject).is_err() {
        return -1;
    }
    if u32::from_ne_bytes(reject) != 0 {
        return 0;
    }
    sched::block_descheduled();
    0
}

pub fn sys_make_runnable(args: [u32; 4]) -> i32 {
    match table::get_thread(ThreadId(args[0])) {
        Some(t) if sched::make_runnable(t) => 0,
        _ => -1,
    }
}
