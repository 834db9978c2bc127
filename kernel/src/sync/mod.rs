//! Synchronization primitives (spec components A and G): a FIFO ticket
//! spinlock for short critical sections, and a sleeping mutex/condvar/
//! semaphore family built on top of it and the scheduler for anything
//! that might hold a lock across a blocking operation.

pub mod cvar;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use cvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::Semaphore;
pub use spinlock::{Ticket, TicketGuard};
