//! Task record (spec component I, task half): address space, live-thread
//! count, zombie children, and the parent/child forest `wait`/`vanish`
//! walk. A task's id is the id of its first ("original") thread, per
//! spec.md's data model.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::mm::vas::AddressSpace;
use crate::sync::cvar::Condvar;
use crate::sync::mutex::{Mutex as SleepMutex, MutexGuard as SleepMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

pub struct ZombieStatus {
    pub task_id: TaskId,
    pub exit_status: i32,
}

/// Everything about a task that needs a lock: live-thread count, the
/// zombie child list, and the exit status this task will report to its
/// own parent once it, too, becomes a zombie.
pub struct TaskInner {
    pub live_threads: u32,
    pub children: Vec<TaskId>,
    pub zombies: Vec<ZombieStatus>,
    pub exit_status: Option<i32>,
    /// The most recently reaped dead thread's storage, kept one generation
    /// behind so `thread_fork`/`wait` can recycle it instead of allocating
    /// (mirrors the original kernel's `dead_thr` slot).
    pub dead_thread_slot: Option<Box<crate::process::tcb::Tcb>>,
}

/// Outcome of `Task::poll_zombie`: either a zombie was immediately
/// available, or none was and the caller still holds the very lock that
/// guards `zombies` -- handing that guard straight to `Condvar::wait`
/// closes the window between "no zombie yet" and "registered as a
/// waiter" that a separate, unrelated lock would leave open.
pub enum ZombiePoll<'a> {
    Ready(ZombieStatus),
    Empty(SleepMutexGuard<'a, TaskInner>),
}

pub struct Task {
    pub id: TaskId,
    pub parent: AtomicU32, // TaskId, 0 means none (reparented to init or root)
    pub address_space: Mutex<AddressSpace>,
    /// A sleeping mutex, not a spinlock: `wait` holds this lock across its
    /// `Condvar::wait` call (see `poll_zombie`), which would deadlock the
    /// whole CPU if a blocked holder ever spun instead of scheduling away.
    pub inner: SleepMutex<TaskInner>,
    /// Signaled whenever a child becomes a zombie, so a blocked `wait` can
    /// be woken without busy-polling the zombie list. Always paired with
    /// `inner`'s own lock, never a separate one -- see `poll_zombie`.
    pub child_exit: Condvar,
}

impl Task {
    pub fn new(id: TaskId, parent: TaskId, address_space: AddressSpace) -> Box<Self> {
        Box::new(Task {
            id,
            parent: AtomicU32::new(parent.0),
            address_space: Mutex::new(address_space),
            inner: SleepMutex::new(TaskInner {
                live_threads: 1,
                children: Vec::new(),
                zombies: Vec::new(),
                exit_status: None,
                dead_thread_slot: None,
            }),
            child_exit: Condvar::new(),
        })
    }

    pub fn parent_id(&self) -> TaskId {
        TaskId(self.parent.load(Ordering::Relaxed))
    }

    pub fn reparent_to(&self, new_parent: TaskId) {
        self.parent.store(new_parent.0, Ordering::Relaxed);
    }

    /// Valid only when single-threaded: the precondition `fork`/`exec`
    /// share (spec §4.J).
    pub fn is_single_threaded(&self) -> bool {
        self.inner.lock().live_threads == 1
    }

    pub fn add_thread(&self) {
        self.inner.lock().live_threads += 1;
    }

    /// Returns true if this was the last live thread in the task (the
    /// caller must then run the task-teardown half of `vanish`).
    pub fn remove_thread(&self, dead: Box<crate::process::tcb::Tcb>) -> bool {
        let mut inner = self.inner.lock();
        inner.live_threads -= 1;
        // Keep only the most recently dead thread's storage; anything
        // still referenced there gets dropped for real now.
        inner.dead_thread_slot = Some(dead);
        inner.live_threads == 0
    }

    pub fn add_zombie(&self, status: ZombieStatus) {
        self.inner.lock().zombies.push(status);
        self.child_exit.notify_all();
    }

    pub fn take_zombie(&self, child: Option<TaskId>) -> Option<ZombieStatus> {
        let mut inner = self.inner.lock();
        match child {
            Some(id) => {
                let idx = inner.zombies.iter().position(|z| z.task_id == id)?;
                Some(inner.zombies.remove(idx))
            }
            None => {
                if inner.zombies.is_empty() {
                    None
                } else {
                    Some(inner.zombies.remove(0))
                }
            }
        }
    }

    pub fn has_children(&self) -> bool {
        let inner = self.inner.lock();
        !inner.children.is_empty() || !inner.zombies.is_empty()
    }

    /// True if `id` is one of this task's live or already-zombie
    /// children -- used by `wait` to reject a specific-child request for
    /// a task that was never actually this task's child.
    pub fn has_child_or_zombie(&self, id: TaskId) -> bool {
        let inner = self.inner.lock();
        inner.children.contains(&id) || inner.zombies.iter().any(|z| z.task_id == id)
    }

    /// Single lock acquisition covering both the "does this child exist
    /// at all / is one already a zombie" check and, if not, handing back
    /// the still-held guard for `wait` to block on `child_exit` with.
    /// `Err` means `child` names something that was never this task's
    /// child; `child = None` means any child will do.
    pub fn poll_zombie(&self, child: Option<TaskId>) -> Result<ZombiePoll<'_>, ()> {
        let mut inner = self.inner.lock();
        match child {
            Some(id) => {
                if !inner.children.contains(&id) && !inner.zombies.iter().any(|z| z.task_id == id) {
                    return Err(());
                }
                if let Some(idx) = inner.zombies.iter().position(|z| z.task_id == id) {
                    return Ok(ZombiePoll::Ready(inner.zombies.remove(idx)));
                }
            }
            None => {
                if inner.children.is_empty() && inner.zombies.is_empty() {
                    return Err(());
                }
                if !inner.zombies.is_empty() {
                    return Ok(ZombiePoll::Ready(inner.zombies.remove(0)));
                }
            }
        }
        Ok(ZombiePoll::Empty(inner))
    }

    pub fn add_child(&self, child: TaskId) {
        self.inner.lock().children.push(child);
    }

    /// Remove `child` from the live-children list. Mirrors the original
    /// kernel's "free one behind you" discipline: the task slot for a
    /// grandchild that already vanished is only actually reclaimed here,
    /// one generation late.
    pub fn remove_child(&self, child: TaskId) {
        let mut inner = self.inner.lock();
        inner.children.retain(|&id| id != child);
    }

    #[cfg(test)]
    pub fn new_for_test(id: TaskId) -> Self {
        Task {
            id,
            parent: AtomicU32::new(0),
            address_space: Mutex::new(AddressSpace::new_for_test()),
            inner: SleepMutex::new(TaskInner {
                live_threads: 1,
                children: Vec::new(),
                zombies: Vec::new(),
                exit_status: None,
                dead_thread_slot: None,
            }),
            child_exit: Condvar::new(),
        }
    }
}
