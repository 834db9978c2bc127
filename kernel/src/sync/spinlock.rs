//! Ticket spinlock (spec component A).
//!
//! Lamport's bakery-style ticket lock: each waiter atomically draws a
//! ticket and spins until the `serving` counter reaches it, which gives
//! strict FIFO fairness -- no waiter can be starved by a later arrival
//! cutting in, unlike a naive test-and-set spinlock. `owner` is debug-only
//! bookkeeping so `unlock` can assert the caller actually held the lock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

pub struct Ticket<T> {
    ticket: AtomicU32,
    serving: AtomicU32,
    #[cfg(debug_assertions)]
    owner: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `TicketGuard`,
// which exists only while the caller holds the ticket currently being
// served, so at most one thread can dereference it at a time.
unsafe impl<T: Send> Send for Ticket<T> {}
unsafe impl<T: Send> Sync for Ticket<T> {}

impl<T> Ticket<T> {
    pub const fn new(data: T) -> Self {
        Ticket {
            ticket: AtomicU32::new(0),
            serving: AtomicU32::new(0),
            #[cfg(debug_assertions)]
            owner: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Draw a ticket and spin until it is being served.
    pub fn lock(&self) -> TicketGuard<'_, T> {
        let my_ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }
        #[cfg(debug_assertions)]
        self.owner.store(current_cpu_marker(), Ordering::Relaxed);
        TicketGuard { lock: self }
    }

    /// Non-blocking attempt: only succeeds if no one else is waiting and
    /// the lock is currently unheld (ticket == serving).
    pub fn try_lock(&self) -> Option<TicketGuard<'_, T>> {
        let serving = self.serving.load(Ordering::Acquire);
        self.ticket
            .compare_exchange(serving, serving + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        #[cfg(debug_assertions)]
        self.owner.store(current_cpu_marker(), Ordering::Relaxed);
        Some(TicketGuard { lock: self })
    }

    fn unlock(&self) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            self.owner.load(Ordering::Relaxed),
            current_cpu_marker(),
            "ticket lock released by a non-owner"
        );
        self.serving.fetch_add(1, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.ticket.load(Ordering::Relaxed) != self.serving.load(Ordering::Relaxed)
    }
}

/// Single-CPU kernel, so "owner" collapses to a constant marker; kept as
/// a named function so a future SMP port has one place to plug in the
/// real CPU id.
#[cfg(debug_assertions)]
fn current_cpu_marker() -> u32 {
    0
}

pub struct TicketGuard<'a, T> {
    lock: &'a Ticket<T>,
}

impl<'a, T> Deref for TicketGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding a TicketGuard means `serving == our ticket`, so
        // no other guard for this lock can exist concurrently.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for TicketGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for TicketGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutual_exclusion_and_fifo_progress() {
        let lock = Ticket::new(0u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 1);
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Ticket::new(());
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(lock.try_lock().is_some());
    }
}
