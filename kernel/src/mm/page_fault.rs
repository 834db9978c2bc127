//! Page fault trap handler (spec component E fault policy).
//!
//! A fault the region map can resolve on its own (a ZFOD conversion, a
//! first touch of a lazily backed page) is invisible to the faulting
//! thread. Anything else becomes a one-shot `swexn` delivery if the
//! thread registered a handler, or a kill otherwise.

use crate::arch;
use crate::arch::context::Ureg;
use crate::process::tcb::SwexnHandler;
use crate::sched;

/// Entry point referenced by `idt::init` for vector 14.
///
/// # Safety
/// Called only from the page-fault ISR stub, with `ureg` pointing at the
/// trap frame it just built on the current kernel stack.
pub extern "C" fn handle(ureg: *mut Ureg) {
    // SAFETY: delegated to caller.
    let ureg = unsafe { &mut *ureg };
    let fault_addr = arch::read_cr2();
    let write = ureg.error_code & 0x2 != 0;

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    let resolved = task.address_space.lock().page_fault(fault_addr, write).is_ok();
    if resolved {
        return;
    }

    deliver_or_kill(ureg, fault_addr);
}

/// Shared policy for any trap that can't be resolved in place: deliver
/// to the faulting thread's one-shot `swexn` handler if it registered
/// one, otherwise kill it. `cause` is handler-defined (a faulting
/// address for a page fault, a bare vector number for the other CPU
/// exceptions in `crate::syscall::fault`).
pub(crate) fn deliver_or_kill(ureg: &mut Ureg, cause: u32) {
    let cur = sched::current();
    // SAFETY: only the faulting thread itself reads/clears its own
    // swexn registration here.
    let handler = unsafe { (*cur.as_ptr()).swexn.take() };
    match handler {
        Some(handler) => deliver_swexn(ureg, handler, cause),
        None => {
            // SAFETY: marks this thread for teardown; sticky, so a
            // concurrent `kill` from another thread is harmless.
            unsafe { (*cur.as_ptr()).kill() };
            crate::process::terminate_current(-2);
        }
    }
}

/// Redirect `ureg` so the ISR's `iretd` drops into the registered
/// handler in user mode instead of retrying the faulting instruction.
/// One-shot: `handler` was already taken out of the TCB by the caller,
/// so a second unhandled fault before the handler re-registers one kills
/// the thread instead of looping.
fn deliver_swexn(ureg: &mut Ureg, handler: SwexnHandler, cause: u32) {
    let saved_ureg_addr = handler.handler_esp.wrapping_sub(core::mem::size_of::<Ureg>() as u32);
    // SAFETY: `handler_esp` was registered by this same user thread via
    // `swexn` over its own stack; the caller (fault delivery) runs before
    // any other thread can touch this address space.
    unsafe {
        core::ptr::write_unaligned(saved_ureg_addr as *mut Ureg, *ureg);
    }

    // cdecl argument area for `void handler(void *arg, int cause, ureg_t *ureg)`,
    // growing down from the saved-ureg copy; slot 0 is a throwaway return
    // address since the handler never returns normally.
    let frame = saved_ureg_addr - 16;
    // SAFETY: same stack region as above.
    unsafe {
        core::ptr::write_unaligned(frame as *mut u32, 0);
        core::ptr::write_unaligned((frame + 4) as *mut u32, handler.arg);
        core::ptr::write_unaligned((frame + 8) as *mut u32, cause);
        core::ptr::write_unaligned((frame + 12) as *mut u32, saved_ureg_addr);
    }

    ureg.eip = handler.handler_eip;
    ureg.esp = frame;
    ureg.eflags = 0x200;
}
