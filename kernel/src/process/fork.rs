//! `fork`/`thread_fork` (spec component J): create a new task (fork) or a
//! new thread in the current task (thread_fork), both resuming execution
//! exactly where the caller's syscall trapped.
//!
//! Neither is a function call in the C sense: there is no "fork returns"
//! in the kernel's own control flow. Each copies the parent's trap frame
//! (`Ureg`), zeroes its return value, and hands it to a fresh `Tcb` whose
//! entry point replays that frame straight into user mode via `iretd`,
//! exactly like an ordinary syscall return. The calling thread's own
//! dispatch returns normally afterward with the new id as its value.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::arch::context::Ureg;
use crate::error::KernelError;
use crate::mm::vas::AddressSpace;
use crate::process::table;
use crate::process::task::{Task, TaskId};
use crate::process::tcb::{Tcb, ThreadId};
use crate::sched;

fn require_single_threaded(task: &Task) -> Result<(), KernelError> {
    if !task.is_single_threaded() {
        return Err(KernelError::InvalidState {
            expected: "single-threaded task",
            actual: "task has more than one live thread",
        });
    }
    Ok(())
}

/// Copy `ureg` onto the heap, zero its `eax` (the child's return value),
/// and leak it as the raw `u32` `Tcb::new` passes through to
/// `fork_trampoline` as `arg`.
fn leak_resumable_frame(ureg: &Ureg) -> u32 {
    let mut copy = *ureg;
    copy.set_return_value(0);
    Box::into_raw(Box::new(copy)) as u32
}

/// `Tcb::new`'s required `extern "C" fn(u32) -> !` entry point for a
/// forked or thread_forked child: reclaims the leaked `Ureg` and resumes
/// straight into user mode at the parent's trapped PC.
extern "C" fn fork_trampoline(arg: u32) -> ! {
    // SAFETY: `arg` was produced by `leak_resumable_frame` above and is
    // only ever handed to this one entry point, exactly once.
    let ureg = unsafe { Box::from_raw(arg as *mut Ureg) };
    // SAFETY: `ureg` holds a valid resumption frame copied from a real
    // trap; the directory active in CR3 is this thread's own, installed
    // by the scheduler's dispatch before this entry point ever runs.
    unsafe { resume_user(&*ureg) }
}

/// Replay a `Ureg` as if it were an ISR's trap frame on the way out:
/// identical to the `popa; add esp, 8; iretd` epilogue every `isr_*` stub
/// in `arch::x86::context` ends with, just driven from a heap copy
/// instead of the live kernel stack.
///
/// # Safety
/// `ureg` must hold a valid user-mode resumption frame (`cs`/`ss`/`eflags`
/// copied from an actual prior trap) and never be read again afterward.
unsafe fn resume_user(ureg: *const Ureg) -> ! {
    // SAFETY: delegated to caller; loads `esp` from the supplied frame
    // and replays the pop/iretd sequence an ISR stub's epilogue uses,
    // relying on `Ureg`'s field order matching `popa`'s pop order.
    unsafe {
        core::arch::asm!(
            "mov esp, {ureg}",
            "popa",
            "add esp, 8",
            "iretd",
            ureg = in(reg) ureg,
            options(noreturn),
        );
    }
}

/// Create a child task: a fresh address space holding a full copy of the
/// caller's, with one thread resuming at the caller's trapped PC and
/// returning 0. Requires the caller's task to be single-threaded.
pub fn fork(ureg: &Ureg) -> Result<ThreadId, KernelError> {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let parent_task = unsafe { cur.as_ref().task.as_ref() };
    require_single_threaded(parent_task)?;

    let child_address_space = AddressSpace::new()?;
    // SAFETY: the parent's address space is the one active in CR3 for
    // the calling thread, which is this syscall's own caller.
    unsafe {
        parent_task.address_space.lock().copy_into(&child_address_space)?;
    }

    let id = table::alloc_thread_id();
    let child_task_id = TaskId(id.0);
    let child_task =
        table::insert_task(Task::new(child_task_id, parent_task.id, child_address_space));
    parent_task.add_child(child_task_id);

    let arg = leak_resumable_frame(ureg);
    let tcb = Tcb::new(ThreadId(id.0), child_task, fork_trampoline, arg);
    let tcb_ptr = table::insert_thread(tcb);
    sched::enqueue_new(tcb_ptr);

    Ok(ThreadId(id.0))
}

/// Create a new thread inside the caller's own task: shares the address
/// space, resumes at the caller's trapped PC and returns 0. Unlike
/// `fork`, not gated on the caller being single-threaded -- that's the
/// whole point of this call.
pub fn thread_fork(ureg: &Ureg) -> Result<ThreadId, KernelError> {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task_ptr: NonNull<Task> = unsafe { cur.as_ref().task };
    let task = unsafe { task_ptr.as_ref() };
    task.add_thread();

    let id = table::alloc_thread_id();
    let arg = leak_resumable_frame(ureg);
    let tcb = Tcb::new(id, task_ptr, fork_trampoline, arg);
    let tcb_ptr = table::insert_thread(tcb);
    sched::enqueue_new(tcb_ptr);

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_single_threaded_rejects_multi_threaded_task() {
        let task = Task::new_for_test(TaskId(1));
        task.add_thread();
        assert!(require_single_threaded(&task).is_err());
    }

    #[test]
    fn leaked_frame_round_trips_with_zeroed_return_value() {
        let ureg = Ureg {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 42,
            vector: 0,
            error_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
        };
        let raw = leak_resumable_frame(&ureg);
        // SAFETY: just produced by `leak_resumable_frame`, not yet freed.
        let boxed = unsafe { Box::from_raw(raw as *mut Ureg) };
        assert_eq!(boxed.eax, 0);
    }
}
