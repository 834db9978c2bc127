//! Syscall dispatch (spec component K): the `int 0x80` trap gate lands in
//! `dispatch`, which reads the call number and four arguments out of the
//! trapped register set and routes to one of the `sys_*` functions spread
//! across this module's children.

pub mod fault;
mod io;
mod lifecycle;
mod memory;
mod misc;
mod numbers;
mod scheduling;
mod swexn;
mod time;

use crate::arch::context::Ureg;
use crate::sched;

/// Entry point wired to vector 0x80 by `arch::x86::idt`. `eax` carries the
/// call number, `ebx`/`ecx`/`edx`/`esi` the four arguments -- both captured
/// by `pusha` before this function ever touches `ureg`.
pub extern "C" fn dispatch(ureg: *mut Ureg) {
    // SAFETY: called only from the `isr_syscall` stub, with `ureg` pointing
    // at the trap frame it just pushed on the current kernel stack.
    let ureg = unsafe { &mut *ureg };
    let nr = ureg.eax;
    let args = ureg.syscall_args();

    let result = route(nr, args, ureg);
    ureg.set_return_value(result as u32);

    // A thread killed while blocked inside this syscall (e.g. by a sibling
    // fault, or `task_vanish` on a different thread of the same task) never
    // gets to run user code again; checking here keeps that in one place
    // instead of scattered across every blocking syscall.
    let cur = sched::current();
    // SAFETY: `cur` is the thread that just ran this syscall.
    if unsafe { cur.as_ref().is_killed() } {
        crate::process::terminate_current(-2);
    }
}

fn route(nr: u32, args: [u32; 4], ureg: &mut Ureg) -> i32 {
    use numbers::*;

    match nr {
        SYS_FORK => lifecycle::sys_fork(ureg),
        SYS_THREAD_FORK => lifecycle::sys_thread_fork(ureg),
        SYS_EXEC => lifecycle::sys_exec(args),
        SYS_SET_STATUS => lifecycle::sys_set_status(args),
        SYS_VANISH => lifecycle::sys_vanish(),
        SYS_TASK_VANISH => lifecycle::sys_task_vanish(args),
        SYS_WAIT => lifecycle::sys_wait(args),
        SYS_GETTID => scheduling::sys_gettid(),
        SYS_YIELD => scheduling::sys_yield(args),
        SYS_DESCHEDULE => scheduling::sys_deschedule(args),
        SYS_MAKE_RUNNABLE => scheduling::sys_make_runnable(args),
        SYS_GET_TICKS => time::sys_get_ticks(),
        SYS_SLEEP => time::sys_sleep(args),
        SYS_NEW_PAGES => memory::sys_new_pages(args),
        SYS_REMOVE_PAGES => memory::sys_remove_pages(args),
        SYS_GETCHAR => io::sys_getchar(),
        SYS_READLINE => io::sys_readline(args),
        SYS_PRINT => io::sys_print(args),
        SYS_SET_TERM_COLOR => io::sys_set_term_color(args),
        SYS_SET_CURSOR_POS => io::sys_set_cursor_pos(args),
        SYS_GET_CURSOR_POS => io::sys_get_cursor_pos(args),
        SYS_HALT => misc::sys_halt(),
        SYS_READFILE => io::sys_readfile(args),
        SYS_SWEXN => swexn::sys_swexn(ureg, args),
        SYS_MISBEHAVE => misc::sys_misbehave(args),
        _ => -1,
    }
}
