//! Task/thread lifecycle orchestration (spec component J) built on top of
//! the task/thread data model in `task`/`tcb`/`table`.

pub mod exec;
pub mod fork;
pub mod table;
pub mod task;
pub mod tcb;
pub mod vanish;
pub mod wait;

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::mm::page_table::Directory;
use crate::mm::vas::AddressSpace;
use crate::process::task::{Task, TaskId};
use crate::process::tcb::{Tcb, ThreadId};

/// Entry point for the very first thread the kernel ever runs: loads the
/// boot program over the identity-mapped directory `mm::init` built, then
/// never returns.
extern "C" fn init_thread_main(_arg: u32) -> ! {
    exec::exec("idle", Vec::new()).expect("failed to load the boot program");
    unreachable!("exec does not return on success");
}

/// Build the first task and its first thread around the boot directory
/// and return the thread for the caller (`kernel_entry`) to hand to
/// `sched::init`. Does not enqueue it; installing the very first thread
/// bypasses the run queue entirely.
pub fn init(boot_directory: Directory) -> NonNull<Tcb> {
    let id = table::alloc_thread_id();
    let task_id = TaskId(id.0);
    let address_space = AddressSpace::from_directory(boot_directory);
    let task = table::insert_task(Task::new(task_id, TaskId(0), address_space));

    let tcb = Tcb::new(ThreadId(id.0), task, init_thread_main, 0);
    table::insert_thread(tcb)
}

/// Tear down the calling thread (and, if it's the task's last, the task
/// itself) and never return. Every exit path -- an explicit `vanish`, a
/// fatal unhandled fault, a sticky `kill` noticed on return from a
/// syscall -- funnels through here.
pub fn terminate_current(status: i32) -> ! {
    vanish::vanish(status)
}
