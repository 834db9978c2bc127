//! 32-bit protected-mode context switch and trap/fault entry stubs.
//!
//! `switch_to` is the only place a thread's saved stack pointer changes
//! hands with another thread's; it implements the callee-saved half of
//! component F's context switch (the scheduler supplies the new address
//! space root separately via `mm::page_table`). The `isr_*` functions are
//! naked entry points referenced by `idt::init`; each builds a `Ureg` on
//! the kernel stack and hands it to the scheduler-independent dispatcher
//! in `syscall`/`mm::page_fault`.

use core::arch::{asm, naked_asm};

/// Saved user/fault register state, pushed by an ISR entry stub.
///
/// Field order matches what the stub pushes, bottom of struct = top of
/// stack at entry: general registers (as `pusha` lays them out), then the
/// fault/trap furniture the CPU itself pushes (error code where
/// applicable, eip, cs, eflags, and -- only on a privilege change -- esp,
/// ss). `swexn`-registered user handlers receive a pointer to this struct.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Ureg {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32, // pusha's ESP slot; not meaningful, never restored
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    pub vector: u32,
    pub error_code: u32,

    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl Ureg {
    pub fn syscall_args(&self) -> [u32; 4] {
        [self.ebx, self.ecx, self.edx, self.esi]
    }

    pub fn set_return_value(&mut self, value: u32) {
        self.eax = value;
    }
}

macro_rules! isr_no_error {
    ($name:ident, $vector:expr, $handler:path) => {
        /// # Safety
        /// Referenced only from the IDT; never called directly.
        #[naked]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                "push 0", // fake error code, keeps frame layout uniform
                "push {vector}",
                "pusha",
                "push esp",
                "call {handler}",
                "add esp, 4",
                "popa",
                "add esp, 8",
                "iretd",
                vector = const $vector,
                handler = sym $handler,
            );
        }
    };
}

macro_rules! isr_with_error {
    ($name:ident, $vector:expr, $handler:path) => {
        /// # Safety
        /// Referenced only from the IDT; never called directly.
        #[naked]
        pub unsafe extern "C" fn $name() {
            naked_asm!(
                // CPU already pushed the error code.
                "push {vector}",
                "pusha",
                "push esp",
                "call {handler}",
                "add esp, 4",
                "popa",
                "add esp, 8",
                "iretd",
                vector = const $vector,
                handler = sym $handler,
            );
        }
    };
}

isr_no_error!(isr_divide_error, 0u32, crate::syscall::fault::divide_error);
isr_no_error!(isr_invalid_opcode, 6u32, crate::syscall::fault::invalid_opcode);
isr_with_error!(isr_general_protection, 13u32, crate::syscall::fault::general_protection);
isr_with_error!(isr_page_fault, 14u32, crate::mm::page_fault::handle);
isr_no_error!(isr_timer, 0x20u32, crate::timer::tick);
isr_no_error!(isr_keyboard, 0x21u32, crate::console::irq_handler);

/// Syscall trap gate entry (`int 0x80`). No error code pushed.
///
/// # Safety
/// Referenced only from the IDT; never called directly.
#[naked]
pub unsafe extern "C" fn isr_syscall() {
    naked_asm!(
        "push 0",
        "push 0x80",
        "pusha",
        "push esp",
        "call {handler}",
        "add esp, 4",
        "popa",
        "add esp, 8",
        "iretd",
        handler = sym crate::syscall::dispatch,
    );
}

/// Saved kernel-only context for a blocked thread: the callee-saved
/// registers plus the stack pointer, per the System V i386 calling
/// convention. `switch_to` is the only function that reads or writes it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelContext {
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
}

/// Switch the CPU's stack (and therefore the running thread) from
/// `prev` to `next`, saving `prev`'s callee-saved registers and restoring
/// `next`'s. Returns once some future switch restores `prev` again.
///
/// # Safety
/// `prev` must point at the current thread's `KernelContext` slot and
/// `next` at a context previously saved by this same function (or seeded
/// by `KernelContext::seed_entry`). The caller must already have updated
/// CR3 and the TSS's esp0 for `next` before returning into user mode.
pub unsafe fn switch_to(prev: *mut KernelContext, next: *const KernelContext) {
    // SAFETY: both pointers are valid per the caller's contract; this
    // performs exactly one round of save-restore for the five
    // callee-saved slots (no other registers cross a call boundary here).
    unsafe {
        asm!(
            "pushfd",
            "push ebx",
            "push esi",
            "push edi",
            "push ebp",
            "mov [{prev} + 16], esp",
            "mov esp, [{next} + 16]",
            "pop ebp",
            "pop edi",
            "pop esi",
            "pop ebx",
            "popfd",
            prev = in(reg) prev,
            next = in(reg) next,
            options(nostack),
        );
    }
}

impl KernelContext {
    /// Build the initial saved context for a thread that has never run:
    /// `switch_to` restoring this context will "return" into `entry` with
    /// `arg` as its first argument, on the given kernel stack.
    pub fn seed_entry(kstack_top: u32, entry: extern "C" fn(u32) -> !, arg: u32) -> Self {
        // Lay out a fake call frame so popping ebp/edi/esi/ebx/eflags and
        // then returning (via the ret implicit in the caller treating esp
        // as a return address slot) lands in `trampoline`, which receives
        // `arg` and `entry` below it on the stack.
        // Written high-address-first so the final `sp` (lowest address)
        // lands on `ebp`, matching the pop order `switch_to` uses to
        // restore a context: ebp, edi, esi, ebx, eflags, then the return
        // address (trampoline), then trampoline's own two stack words.
        let mut sp = kstack_top & !0xF;
        unsafe {
            sp -= 4;
            *(sp as *mut u32) = arg;
            sp -= 4;
            *(sp as *mut u32) = entry as u32;
            sp -= 4;
            *(sp as *mut u32) = trampoline as u32; // return address
            sp -= 4;
            *(sp as *mut u32) = 0x200; // eflags, IF set
            sp -= 4;
            *(sp as *mut u32) = 0; // ebx
            sp -= 4;
            *(sp as *mut u32) = 0; // esi
            sp -= 4;
            *(sp as *mut u32) = 0; // edi
            sp -= 4;
            *(sp as *mut u32) = 0; // ebp
        }
        KernelContext {
            ebx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            esp: sp,
        }
    }
}

/// Pulls `entry`/`arg` off the seeded stack frame and calls into the
/// thread's real entry point; never returns.
#[naked]
unsafe extern "C" fn trampoline() -> ! {
    naked_asm!("pop eax", "pop ecx", "call eax", "ud2", options());
}
