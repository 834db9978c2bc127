//! First entry into user mode for a newly created thread.
//!
//! `enter_usermode` builds an `iretd` frame by hand and never returns: it
//! is the last thing a thread's kernel-side setup does before running user
//! code for the first time. Subsequent re-entries after a syscall or fault
//! go through the normal `isr_*` stub's `iretd` in `context.rs`.

use super::gdt::{USER_CS, USER_DS};

/// Transition the CPU from ring 0 to ring 3.
///
/// # Safety
/// - `entry` must be a valid, executable user-space address mapped in the
///   address space currently loaded in CR3.
/// - `user_stack` must point at a valid, user-accessible stack top.
/// - The TSS's esp0 must already be set to this thread's kernel stack, or
///   the first trap taken from user mode after this call corrupts memory.
pub unsafe fn enter_usermode(entry: u32, user_stack: u32) -> ! {
    // SAFETY: builds a well-formed iretd frame (ss, esp, eflags, cs, eip) on
    // the current kernel stack and pops it via a far return. IF is set in
    // eflags (0x200) so the user thread runs preemptibly. Data segments are
    // loaded with the user selector first since iretd only restores cs/ss.
    unsafe {
        core::arch::asm!(
            "mov ax, {user_ds:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "push {user_ds:r}",
            "push {stack}",
            "push 0x200",
            "push {user_cs:r}",
            "push {entry}",
            "iretd",
            user_ds = in(reg) USER_DS as u32,
            user_cs = in(reg) USER_CS as u32,
            stack = in(reg) user_stack,
            entry = in(reg) entry,
            out("ax") _,
            options(noreturn),
        );
    }
}
