//! Tick counter and sleep queue (spec component H).
//!
//! The timer ISR is the kernel's sole preemption point: it acks the PIT,
//! bumps the free-running tick counter, wakes every sleeper whose deadline
//! has arrived, and only then calls into the scheduler. Everything here
//! runs with interrupts disabled, courtesy of the interrupt gate `idt`
//! installed this vector on.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use alloc::vec::Vec;

use crate::arch;
use crate::arch::context::Ureg;
use crate::arch::x86::timer as pit;
use crate::process::tcb::Tcb;
use crate::sched;
use crate::sync::spinlock::Ticket;

/// PIT/scheduler tick period. 10ms is a responsive round-robin quantum
/// without making the sleep-queue drain a hot path.
pub const TICK_INTERVAL_MS: u32 = 10;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// One pending `sleep` call. Kept in a plain sorted `Vec` rather than the
/// component-B intrusive list: a thread's single `link` field is already
/// spoken for by whichever wait list it occupies, and a sleeper isn't on
/// any other wait list, but `List` only exposes FIFO push/pop, not a
/// sorted insert -- a `Vec` with `partition_point` gets ascending wake
/// order just as well at this scale.
struct SleepEntry {
    wake: u32,
    thread: NonNull<Tcb>,
}

// SAFETY: entries are only read or written while `SLEEPERS`'s spinlock is
// held, and the Tcb they point at outlives the sleep (it only leaves the
// table after `vanish`, which a sleeping thread cannot be in the middle
// of).
unsafe impl Send for SleepEntry {}

static SLEEPERS: Ticket<Vec<SleepEntry>> = Ticket::new(Vec::new());

/// Read the free-running tick counter. Read with interrupts disabled so a
/// concurrent timer tick can't be observed mid-update.
pub fn get_ticks() -> u32 {
    let _guard = arch::disable_interrupts();
    TICKS.load(Ordering::Relaxed)
}

/// Block the calling thread until `ticks` ticks from now have elapsed.
/// `ticks == 0` returns immediately without blocking, per spec.
pub fn sleep(ticks: u32) {
    if ticks == 0 {
        return;
    }
    let wake = TICKS.load(Ordering::Relaxed).wrapping_add(ticks);
    let me = sched::current();
    sched::block_on(|| {
        let mut sleepers = SLEEPERS.lock();
        let pos = sleepers.partition_point(|e| e.wake <= wake);
        sleepers.insert(pos, SleepEntry { wake, thread: me });
    });
}

/// Timer ISR body. Runs on the current thread's kernel stack with
/// interrupts disabled (interrupt gate); acks the device, advances the
/// tick counter, drains every sleep entry whose deadline has arrived, and
/// finally reschedules -- the one preemption point named in spec.md §4.H.
pub extern "C" fn tick(_ureg: *mut Ureg) {
    pit::send_eoi();
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    let due = {
        let mut sleepers = SLEEPERS.lock();
        let split = sleepers.partition_point(|e| e.wake <= now);
        sleepers.drain(..split).collect::<Vec<_>>()
    };
    for entry in due {
        sched::unblock(entry.thread);
    }

    sched::timer_preempt();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_queue_stays_sorted_by_wake_tick() {
        let mut sleepers: Vec<SleepEntry> = Vec::new();
        let dummy = NonNull::dangling();
        for wake in [50u32, 10, 30, 20] {
            let pos = sleepers.partition_point(|e| e.wake <= wake);
            sleepers.insert(pos, SleepEntry { wake, thread: dummy });
        }
        let order: Vec<u32> = sleepers.iter().map(|e| e.wake).collect();
        assert_eq!(order, alloc::vec![10, 20, 30, 50]);
    }

    #[test]
    fn drain_prefix_stops_at_first_not_yet_due() {
        let mut sleepers: Vec<SleepEntry> = Vec::new();
        let dummy = NonNull::dangling();
        for wake in [5u32, 15, 25] {
            sleepers.push(SleepEntry { wake, thread: dummy });
        }
        let split = sleepers.partition_point(|e| e.wake <= 15);
        assert_eq!(split, 2);
    }
}
