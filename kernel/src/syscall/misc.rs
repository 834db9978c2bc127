//! `halt`/`misbehave`.

use crate::arch;

pub fn sys_halt() -> ! {
    arch::halt()
}

/// Debugging knob in the original kernel (scheduler/paging test-mode
/// behavior); implementation-defined and outside this kernel's testable
/// properties, so this is a documented no-op extension point rather than
/// a real mode switch.
pub fn sys_misbehave(_args: [u32; 4]) -> i32 {
    0
}
