//! CPU exception handlers that share `mm::page_fault`'s deliver-or-kill
//! policy (spec component K: "all other faults [go] to the user
//! exception handler if installed, else terminate the task").
//!
//! Each function here is the `extern "C" fn(ureg: *mut Ureg)` target
//! `idt::FAULT_VECTORS`/`context`'s `isr_*` stubs are wired to.

use crate::arch::context::Ureg;
use crate::mm::page_fault::deliver_or_kill;

/// Vector 0: `#DE`, divide-by-zero or overflow from `div`/`idiv`.
pub extern "C" fn divide_error(ureg: *mut Ureg) {
    // SAFETY: called only from the divide-error ISR stub, with `ureg`
    // pointing at the trap frame it just built on the current stack.
    let ureg = unsafe { &mut *ureg };
    deliver_or_kill(ureg, 0);
}

/// Vector 6: `#UD`, an undefined or reserved instruction encoding.
pub extern "C" fn invalid_opcode(ureg: *mut Ureg) {
    // SAFETY: see `divide_error`.
    let ureg = unsafe { &mut *ureg };
    deliver_or_kill(ureg, 6);
}

/// Vector 13: `#GP`, a segment, privilege, or addressing-mode violation
/// that isn't a page fault.
pub extern "C" fn general_protection(ureg: *mut Ureg) {
    // SAFETY: see `divide_error`.
    let ureg = unsafe { &mut *ureg };
    deliver_or_kill(ureg, 13);
}
