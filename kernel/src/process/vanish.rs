//! Thread and task teardown (spec component J: `vanish` and `task_vanish`).

use crate::arch;
use crate::process::table;
use crate::process::task::{Task, TaskId, ZombieStatus};
use crate::process::tcb::ThreadState;
use crate::sched;

/// Tear down the calling thread and never return. If it was the task's
/// last live thread, also tears down the task: frees every mapped page,
/// folds live children and already-collected zombies up to the parent,
/// and deposits this task's own zombie record for the parent's `wait`.
pub fn vanish(status: i32) -> ! {
    let cur = sched::current();
    // SAFETY: `cur` is the currently running thread; its task outlives
    // this call (only reclaimed once every thread, including this one,
    // has left the table).
    let (task, id) = unsafe { (cur.as_ref().task.as_ref(), cur.as_ref().id) };

    let dead = table::take_thread(id).expect("current thread missing from table");
    let was_last = task.remove_thread(dead);
    if was_last {
        finish_task(task, status);
    }

    // SAFETY: no wait list references this thread any more (it was just
    // removed from the table, and a thread only ever appears in the
    // table's map, never a second structure); it is safe to mark it
    // `Exiting` and schedule away permanently.
    unsafe { (*cur.as_ptr()).state = ThreadState::Exiting };
    let _guard = arch::disable_interrupts();
    sched::schedule();
    unreachable!("a vanished thread was rescheduled");
}

/// Resolution of the open question on `task_vanish`'s exact semantics
/// (see DESIGN.md): it sets the task's exit status to `status` and
/// terminates every thread of the task, not just the caller. Threads
/// other than the caller notice via their own `is_killed()` check the
/// next time they return to user mode or unblock; the caller finishes
/// the task-teardown half itself once it becomes the last thread
/// standing, exactly like a plain `vanish`.
pub fn task_vanish(status: i32) -> ! {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread.
    let task = unsafe { cur.as_ref().task.as_ref() };
    {
        let mut inner = task.inner.lock();
        inner.exit_status = Some(status);
    }
    table::mark_task_threads_killed(task.id);
    vanish(status)
}

fn finish_task(task: &Task, status: i32) {
    task.address_space.lock().free_all();

    let parent_id = task.parent_id();
    let Some(parent) = table::get_task(parent_id) else {
        return;
    };
    // SAFETY: looked up live by id from the table.
    let parent = unsafe { parent.as_ref() };

    let (children, zombies, status_override) = {
        let mut inner = task.inner.lock();
        (
            core::mem::take(&mut inner.children),
            core::mem::take(&mut inner.zombies),
            inner.exit_status,
        )
    };

    // Orphaned live children and already-collected zombie grandchildren
    // both move up to this task's parent, so nothing is ever left
    // unreachable by any future `wait`.
    for child_id in children {
        if let Some(child) = table::get_task(child_id) {
            // SAFETY: looked up live by id.
            unsafe { child.as_ref().reparent_to(parent_id) };
        }
        parent.add_child(child_id);
    }
    for z in zombies {
        parent.add_zombie(z);
    }

    parent.remove_child(task.id);
    parent.add_zombie(ZombieStatus {
        task_id: task.id,
        exit_status: status_override.unwrap_or(status),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::task::TaskId as Id;
    use alloc::boxed::Box;

    #[test]
    fn finish_task_deposits_a_zombie_for_the_parent() {
        let parent = table::insert_task(Box::new(Task::new_for_test(Id(101))));
        let child = table::insert_task(Box::new(Task::new_for_test(Id(102))));
        // SAFETY: just inserted, both live for the rest of this test.
        let (parent, child) = unsafe { (parent.as_ref(), child.as_ref()) };
        child.reparent_to(Id(101));
        parent.add_child(Id(102));

        finish_task(child, 7);
        let z = parent.take_zombie(None).unwrap();
        assert_eq!(z.task_id, Id(102));
        assert_eq!(z.exit_status, 7);
        assert!(!parent.has_children());
    }

    #[test]
    fn finish_task_reparents_live_grandchildren_to_the_grandparent() {
        let grandparent = table::insert_task(Box::new(Task::new_for_test(Id(110))));
        let parent = table::insert_task(Box::new(Task::new_for_test(Id(111))));
        let grandchild = table::insert_task(Box::new(Task::new_for_test(Id(112))));
        // SAFETY: all three just inserted, live for the rest of this test.
        let (grandparent, parent, grandchild) =
            unsafe { (grandparent.as_ref(), parent.as_ref(), grandchild.as_ref()) };
        parent.reparent_to(Id(110));
        grandparent.add_child(Id(111));
        grandchild.reparent_to(Id(111));
        parent.add_child(Id(112));

        finish_task(parent, 0);
        assert_eq!(grandchild.parent_id(), Id(110));
        assert!(grandparent.has_children());
        let z = grandparent.take_zombie(Some(Id(111))).unwrap();
        assert_eq!(z.task_id, Id(111));
    }
}
