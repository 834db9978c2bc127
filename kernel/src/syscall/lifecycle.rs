//! `fork`/`thread_fork`/`exec`/`set_status`/`vanish`/`task_vanish`/`wait`
//! (spec component J's syscall surface).

use alloc::vec::Vec;

use crate::arch::context::Ureg;
use crate::error::KernelError;
use crate::mm::user_validation::{copy_argv_from_user, copy_str_from_user, copy_to_user};
use crate::process::task::TaskId;
use crate::process::tcb::ThreadId;
use crate::process::{exec, fork, vanish, wait};
use crate::sched;

/// `fork`/`exec` distinguish exactly one failure (caller's task has more
/// than one live thread) with `-2`; everything else is `-1`.
pub(super) fn fork_like_code(err: KernelError) -> i32 {
    match err {
        KernelError::InvalidState { .. } => -2,
        _ => -1,
    }
}

pub fn sys_fork(ureg: &mut Ureg) -> i32 {
    match fork::fork(ureg) {
        Ok(ThreadId(id)) => id as i32,
        Err(e) => fork_like_code(e),
    }
}

pub fn sys_thread_fork(ureg: &mut Ureg) -> i32 {
    match fork::thread_fork(ureg) {
        Ok(ThreadId(id)) => id as i32,
        Err(e) => fork_like_code(e),
    }
}

/// `exec(name, argv)`: `args[0]` is the program name pointer, `args[1]`
/// is the argv pointer array (0 for "no arguments beyond the name").
pub fn sys_exec(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    let name = match copy_str_from_user(task, args[0]) {
        Ok(s) => s,
        Err(e) => return fork_like_code(e),
    };
    let argv = if args[1] == 0 {
        Vec::new()
    } else {
        match copy_argv_from_user(task, args[1]) {
            Ok(v) => v,
            Err(e) => return fork_like_code(e),
        }
    };

    match exec::exec(&name, argv) {
        Ok(()) => unreachable!("exec does not return on success"),
        Err(e) => fork_like_code(e),
    }
}

pub fn sys_set_status(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    task.inner.lock().exit_status = Some(args[0] as i32);
    0
}

pub fn sys_vanish() -> ! {
    vanish::vanish(0)
}

pub fn sys_task_vanish(args: [u32; 4]) -> ! {
    vanish::task_vanish(args[0] as i32)
}

/// `wait(status_ptr)`: reaps any zombie child (not a specific one -- the
/// external interface has no way to name one), writes its exit status
/// through `status_ptr` if non-null, and returns its id.
pub fn sys_wait(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    match wait::wait(task, None) {
        Ok((TaskId(id), status)) => {
            if args[0] != 0 && copy_to_user(task, args[0], &status.to_le_bytes()).is_err() {
                return -1;
            }
            id as i32
        }
        Err(e) => fork_like_code(e),
    }
}
