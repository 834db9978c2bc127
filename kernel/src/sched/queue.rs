//! Single FIFO run queue (spec component F). No priorities, no classes --
//! every runnable thread is equally eligible and dispatch is strict
//! round-robin arrival order, consistent with the Non-goal on fairness
//! policy beyond plain FIFO.

use core::ptr::addr_of_mut;
use core::ptr::NonNull;

use spin::Mutex;

use crate::process::tcb::Tcb;
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

pub struct RunQueue {
    list: Mutex<List<Tcb>>,
}

impl RunQueue {
    pub const fn new() -> Self {
        RunQueue {
            list: Mutex::new(List::new(link_of, node_of)),
        }
    }

    pub fn push_back(&self, t: NonNull<Tcb>) {
        self.list.lock().push_back(t);
    }

    pub fn pop_front(&self) -> Option<NonNull<Tcb>> {
        self.list.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }
}
