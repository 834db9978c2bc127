//! `swexn(esp3, eip, arg, newureg)` (spec component K): one-shot user
//! exception handler registration, with an optional immediate context
//! swap.
//!
//! `esp3 == 0 && eip == 0` deregisters any handler instead of installing
//! one, matching the original kernel's convention.

use crate::arch::context::Ureg;
use crate::arch::gdt::{USER_CS, USER_DS};
use crate::mm::user_validation::copy_from_user;
use crate::mm::vas::RegionFlags;
use crate::mm::FRAME_SIZE;
use crate::process::tcb::SwexnHandler;
use crate::sched;

const UREG_SIZE: u32 = core::mem::size_of::<Ureg>() as u32;

fn writable_at(vas: &crate::mm::vas::AddressSpace, addr: u32) -> bool {
    vas.get_attrs(addr & !(FRAME_SIZE as u32 - 1))
        .is_some_and(|f| f.contains(RegionFlags::USER | RegionFlags::WRITABLE))
}

pub fn sys_swexn(ureg: &mut Ureg, args: [u32; 4]) -> i32 {
    let esp3 = args[0];
    let eip = args[1];
    let arg = args[2];
    let newureg = args[3];

    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };

    if esp3 == 0 && eip == 0 {
        // SAFETY: only the owning thread touches its own `swexn` field.
        unsafe { (*cur.as_ptr()).swexn = None };
    } else {
        let vas = task.address_space.lock();
        let handler_frame_low = esp3.wrapping_sub(UREG_SIZE + 16);
        if vas.get_attrs(eip).is_none() || !writable_at(&vas, handler_frame_low) || !writable_at(&vas, esp3 - 1) {
            return -1;
        }
        drop(vas);
        // SAFETY: only the owning thread touches its own `swexn` field.
        unsafe {
            (*cur.as_ptr()).swexn = Some(SwexnHandler {
                handler_eip: eip,
                handler_esp: esp3,
                arg,
            });
        }
    }

    if newureg != 0 {
        let mut bytes = [0u8; core::mem::size_of::<Ureg>()];
        if copy_from_user(task, newureg, &mut bytes).is_err() {
            return -1;
        }
        // SAFETY: `Ureg` is a `repr(C)` struct of plain `u32` fields, so
        // any bit pattern copied into a correctly sized buffer is valid.
        let adopted: Ureg = unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Ureg) };
        if adopted.cs as u16 != USER_CS || adopted.ss as u16 != USER_DS {
            return -1;
        }
        *ureg = adopted;
    }

    0
}
