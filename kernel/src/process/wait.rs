//! `wait` (spec component J): block until some child becomes a zombie
//! (or collect one already waiting), report its exit status, and release
//! its task-table slot.

use crate::error::KernelError;
use crate::process::table;
use crate::process::task::{Task, TaskId, ZombiePoll};

/// Block the calling task until a child (or specifically `child`, if
/// given) becomes a zombie, then reap it: return its id and exit status,
/// and free its table slot. Errors if `child` is given but is not one of
/// the caller's children (live or zombie) -- distinct from "no zombie
/// yet", which blocks instead.
pub fn wait(task: &Task, child: Option<TaskId>) -> Result<(TaskId, i32), KernelError> {
    loop {
        // `poll_zombie` checks the zombie list and, if empty, hands back
        // the very guard that protects it -- so the wait below registers
        // as a waiter without ever releasing that lock in between. A
        // separate lock here would leave a window where a child's
        // `add_zombie` could push and `notify_all` before this thread is
        // on the waiter list, losing the wakeup for good.
        match task.poll_zombie(child) {
            Err(()) => {
                return Err(KernelError::ProcessNotFound {
                    pid: child.map_or(0, |id| id.0),
                });
            }
            Ok(ZombiePoll::Ready(zombie)) => {
                table::remove_task(zombie.task_id);
                return Ok((zombie.task_id, zombie.exit_status));
            }
            Ok(ZombiePoll::Empty(guard)) => {
                // Re-checked in a loop on wakeup since `notify_all` wakes
                // every waiter, not just the one whose child actually
                // exited.
                let _ = task.child_exit.wait(guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn wait_with_no_children_fails_immediately() {
        let task = Task::new_for_test(TaskId(1));
        assert!(wait(&task, None).is_err());
    }

    #[test]
    fn wait_reaps_an_already_zombie_child() {
        let parent = table::insert_task(Box::new(Task::new_for_test(TaskId(201))));
        // SAFETY: just inserted.
        let parent = unsafe { parent.as_ref() };
        parent.add_child(TaskId(202));
        parent.add_zombie(crate::process::task::ZombieStatus {
            task_id: TaskId(202),
            exit_status: 42,
        });

        let (id, status) = wait(parent, None).unwrap();
        assert_eq!(id, TaskId(202));
        assert_eq!(status, 42);
    }

    #[test]
    fn wait_for_specific_child_rejects_a_stranger() {
        let parent = Task::new_for_test(TaskId(3));
        parent.add_child(TaskId(4));
        assert!(wait(&parent, Some(TaskId(999))).is_err());
    }
}
