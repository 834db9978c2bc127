//! Sleeping mutex (spec component G), built on the scheduler (F) and the
//! ticket spinlock (A).
//!
//! Unlike a spinlock, a blocked waiter is taken off the CPU entirely: it
//! links itself onto the mutex's FIFO wait list and calls
//! `sched::block_on`, which atomically (interrupts disabled) performs the
//! linking and the state transition to `Blocked`, so a concurrent
//! `unlock` can never release the mutex into a gap where the wakeup would
//! be lost. Ownership transfers directly from the unlocking thread to the
//! head of the wait list -- the woken thread does not re-contend for the
//! lock, it simply finds itself already holding it.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr::{addr_of_mut, NonNull};

use crate::process::tcb::Tcb;
use crate::sched;
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

enum MutexState {
    Unlocked,
    /// Held by `owner`; `waiters` are FIFO-ordered threads waiting to take
    /// it over on the next unlock.
    Locked { owner: NonNull<Tcb>, waiters: List<Tcb> },
}

pub struct Mutex<T> {
    state: Ticket<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Mutex {
            state: Ticket::new(MutexState::Unlocked),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        let mut guard = self.state.lock();
        match &mut *guard {
            MutexState::Unlocked => {
                *guard = MutexState::Locked {
                    owner: sched::current(),
                    waiters: List::new(link_of, node_of),
                };
            }
            MutexState::Locked { waiters, .. } => {
                let me = sched::current();
                // SAFETY: `me` outlives this block; `waiters` belongs to
                // this mutex and is protected by `self.state`.
                let waiters_ptr = waiters as *const List<Tcb>;
                // The ticket guard must not still be held once `schedule`
                // switches away, or no other thread could ever reach
                // `unlock` to wake us. `prepare` runs with interrupts
                // already disabled and the state spinlock is uncontended
                // by interrupt handlers, so dropping it here -- after
                // linking onto the wait list but before `block_on` calls
                // `schedule` -- is the last safe point to release it.
                sched::block_on(move || {
                    unsafe { (*waiters_ptr).push_back(me) };
                    drop(guard);
                });
                // When we wake up we have already been handed ownership
                // by `unlock` below; nothing further to do.
                return MutexGuard { mutex: self };
            }
        }
        MutexGuard { mutex: self }
    }

    fn unlock(&self) {
        let mut guard = self.state.lock();
        let next = match &mut *guard {
            MutexState::Locked { waiters, .. } => waiters.pop_front(),
            MutexState::Unlocked => unreachable!("unlock on unlocked mutex"),
        };
        match next {
            Some(next_owner) => {
                // Ownership transfers directly: the new owner is marked
                // runnable but `Locked { owner: next_owner }` is set before
                // it ever runs again, so it never has to re-acquire.
                if let MutexState::Locked { owner, .. } = &mut *guard {
                    *owner = next_owner;
                }
                drop(guard);
                sched::unblock(next_owner);
            }
            None => {
                *guard = MutexState::Unlocked;
            }
        }
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// Exposes the mutex a guard came from, so `Condvar::wait` can drop
    /// the guard (unlocking) and later re-lock the same mutex.
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a MutexGuard implies exclusive ownership of the
        // mutex, established by `lock`'s hand-off protocol.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
