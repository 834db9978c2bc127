//! Condition variable (spec component G), paired with a `Mutex` the same
//! way POSIX `pthread_cond_t` pairs with a `pthread_mutex_t`: `wait` atomically
//! releases the mutex and blocks, re-acquiring it before returning.
//!
//! Used directly by `process::task::Task` to implement `wait`/`vanish`'s
//! parent-blocks-for-a-zombie-child handshake (`child_exit`).

use core::ptr::{addr_of_mut, NonNull};

use crate::process::tcb::Tcb;
use crate::sched;
use crate::sync::mutex::{Mutex, MutexGuard};
use crate::sync::spinlock::Ticket;
use crate::util::list::{Link, List};

fn link_of(mut p: NonNull<Tcb>) -> NonNull<Link> {
    // SAFETY: `p` points at a live Tcb for the duration of this call.
    unsafe { NonNull::new(addr_of_mut!((*p.as_mut()).link)).unwrap() }
}

unsafe fn node_of(link: NonNull<Link>) -> NonNull<Tcb> {
    let offset = core::mem::offset_of!(Tcb, link);
    // SAFETY: `link` was produced by `link_of` on a real Tcb.
    unsafe { NonNull::new_unchecked(link.as_ptr().cast::<u8>().sub(offset).cast::<Tcb>()) }
}

pub struct Condvar {
    waiters: Ticket<List<Tcb>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar {
            waiters: Ticket::new(List::new(link_of, node_of)),
        }
    }

    /// Atomically unlock `guard` and block the current thread, then
    /// re-lock before returning. The caller must re-check its wait
    /// condition in a loop -- a woken thread is only guaranteed that a
    /// `signal`/`broadcast` happened, not that the condition it cares
    /// about still holds.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        let me = sched::current();
        let waiters = &self.waiters;
        sched::block_on(move || {
            waiters.lock().push_back(me);
            drop(guard);
        });
        mutex.lock()
    }

    /// Wake the longest-waiting thread, if any.
    pub fn notify_one(&self) {
        let next = self.waiters.lock().pop_front();
        if let Some(t) = next {
            sched::unblock(t);
        }
    }

    /// Wake every currently waiting thread.
    pub fn notify_all(&self) {
        let guard = self.waiters.lock();
        while let Some(t) = guard.pop_front() {
            sched::unblock(t);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
