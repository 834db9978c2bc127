//! Counting semaphore (spec component G), built the same way as `Mutex`:
//! a spinlock-protected count plus a FIFO wait list, blocking through
//! `sched::block_on`/`sched::unblock` instead of spinning.

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

struct State {
    count: i32,
    waiters: List<Tcb>,
}

pub struct Semaphore {
    state: Ticket<State>,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Semaphore {
            state: Ticket::new(State {
                count: initial,
                waiters: List::new(link_of, node_of),
            }),
        }
    }

    /// Decrement the count; block if it would go negative.
    pub fn wait(&self) {
        let mut guard = self.state.lock();
        guard.count -= 1;
        if guard.count < 0 {
            let me = sched::current();
            let waiters_ptr = &guard.waiters as *const List<Tcb>;
            sched::block_on(move || {
                unsafe { (*waiters_ptr).push_back(me) };
                drop(guard);
            });
        }
    }

    /// Increment the count; wake one waiter if any were blocked.
    pub fn signal(&self) {
        let mut guard = self.state.lock();
        guard.count += 1;
        let woken = if guard.count <= 0 { guard.waiters.pop_front() } else { None };
        drop(guard);
        if let Some(t) = woken {
            sched::unblock(t);
        }
    }
}
