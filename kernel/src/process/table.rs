//! Global task/thread table (spec component I).
//!
//! The table is the sole owner of every live `Task` and `Tcb` allocation;
//! the scheduler's run queue and every wait list only ever hold `NonNull`
//! pointers into storage this module allocated and will eventually free.
//! IDs are allocated here and never reused while an entry is live, so a
//! stale `TaskId`/`ThreadId` is always safely distinguishable from a live
//! one via a table lookup.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::process::task::{Task, TaskId};
use crate::process::tcb::{Tcb, ThreadId};

/// Task ids and thread ids are drawn from one shared counter: a task's
/// id is, by definition, its first thread's id (see `task.rs`), so two
/// independent sequences could let a task and some unrelated thread
/// collide on the same numeric id.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

static TASKS: Mutex<BTreeMap<u32, Box<Task>>> = Mutex::new(BTreeMap::new());
static THREADS: Mutex<BTreeMap<u32, Box<Tcb>>> = Mutex::new(BTreeMap::new());

pub fn alloc_task_id() -> TaskId {
    TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

pub fn alloc_thread_id() -> ThreadId {
    ThreadId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Insert a newly created task into the table and return a stable
/// pointer to it. The table owns the `Box` from here on.
pub fn insert_task(task: Box<Task>) -> NonNull<Task> {
    let id = task.id;
    let mut tasks = TASKS.lock();
    let entry = tasks.entry(id.0).or_insert(task);
    NonNull::from(&**entry)
}

pub fn get_task(id: TaskId) -> Option<NonNull<Task>> {
    TASKS.lock().get(&id.0).map(|t| NonNull::from(&**t))
}

/// Drop a task's storage. Only valid once it has no live threads and has
/// been reaped by its parent's `wait`.
pub fn remove_task(id: TaskId) {
    TASKS.lock().remove(&id.0);
}

pub fn insert_thread(tcb: Box<Tcb>) -> NonNull<Tcb> {
    let id = tcb.id;
    let mut threads = THREADS.lock();
    let entry = threads.entry(id.0).or_insert(tcb);
    NonNull::from(&**entry)
}

pub fn get_thread(id: ThreadId) -> Option<NonNull<Tcb>> {
    THREADS.lock().get(&id.0).map(|t| NonNull::from(&**t))
}

/// Take ownership of a thread's storage back out of the table, e.g. to
/// hand it to `Task::remove_thread`'s most-recently-dead slot.
pub fn take_thread(id: ThreadId) -> Option<Box<Tcb>> {
    THREADS.lock().remove(&id.0)
}

/// Mark every thread belonging to `task_id` killed (component J's
/// `task_vanish`). Each thread notices on its own next return to user
/// mode or unblock; this function only sets the sticky flag.
pub fn mark_task_threads_killed(task_id: TaskId) {
    let threads = THREADS.lock();
    for tcb in threads.values() {
        // SAFETY: every entry's `task` pointer is valid for as long as
        // the task stays in the table, which outlives any of its threads.
        if unsafe { tcb.task.as_ref().id } == task_id {
            tcb.kill();
        }
    }
}

pub fn task_count() -> usize {
    TASKS.lock().len()
}

pub fn thread_count() -> usize {
    THREADS.lock().len()
}
