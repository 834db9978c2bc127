//! Pebble kernel library: a preemptive, single-CPU, 32-bit protected-mode
//! x86 microkernel core -- frame allocator and paging (`mm`), the
//! scheduler and synchronization primitives (`sched`, `sync`), task and
//! thread lifecycle (`process`), and the syscall/fault entry plane
//! (`syscall`).
//!
//! `kernel_entry` is the single place these come up in dependency order;
//! everything before it runs on the bootstrap stack `arch::x86::boot`
//! built, everything after it runs as the kernel's first real thread.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![cfg_attr(all(test, target_os = "none"), feature(custom_test_frameworks))]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(
    all(test, target_os = "none"),
    test_runner(crate::test_framework::test_runner)
)]
#![cfg_attr(all(test, target_os = "none"), reexport_test_harness_main = "test_main")]

extern crate alloc;

#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(target_os = "none")]
#[global_allocator]
static GLOBAL_ALLOCATOR: &LockedHeap = &ALLOCATOR;

// Host target (cargo test on the dev machine): delegate to the system
// allocator so ordinary `#[test]`s can use Vec/String/Box freely without
// ever touching the bare-metal heap above.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod console;
pub mod elf;
pub mod error;
pub mod image;
mod logger;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod sync;
mod syscall;
pub mod timer;
pub mod util;

#[cfg(target_os = "none")]
mod test_framework;
#[cfg(target_os = "none")]
pub use test_framework::{exit_qemu, QemuExitCode};

use core::panic::PanicInfo;

/// Reached from `arch::x86::boot`'s `_start` stub with the multiboot magic
/// and info pointer cdecl-pushed in that order (magic pushed last, so it
/// arrives as the first argument). Brings up memory, the CPU tables, the
/// scheduler and the first task, then switches onto that task's kernel
/// stack and never returns to this one.
#[no_mangle]
pub extern "C" fn kernel_entry(multiboot_magic: u32, multiboot_info: u32) -> ! {
    logger::init();
    arch::entry::arch_early_init();

    assert_eq!(
        multiboot_magic, 0x2BAD_B002,
        "bootloader did not hand off a valid multiboot info structure"
    );

    // SAFETY: called exactly once, here, before anything else touches
    // physical memory or page tables.
    let boot_directory = unsafe { mm::init(multiboot_info) };

    arch::init();

    let first = process::init(boot_directory);
    sched::init(first);

    log::info!("scheduler armed, entering first thread");

    // Smoke-test hook: prove the concurrency/memory core (frame allocator,
    // paging, scheduler, first task/thread) brought up cleanly without
    // ever needing a user-mode image, then shut the VM down with a
    // pass/fail code `tests/end_to_end.rs` is run under. Not reachable in
    // a normal boot.
    #[cfg(feature = "test-kernel")]
    test_framework::exit_qemu(test_framework::QemuExitCode::Success);

    arch::enable_interrupts();

    // SAFETY: `boot_ctx` is never switched back into -- the bootstrap
    // stack `_start` built is abandoned for good once this call returns
    // control to `first`'s seeded context, which never returns to here.
    let mut boot_ctx = arch::context::KernelContext::default();
    unsafe {
        arch::gdt::set_kernel_stack(first.as_ref().kernel_stack_top());
        arch::write_cr3(first.as_ref().task.as_ref().address_space.lock().cr3());
        arch::context::switch_to(&mut boot_ctx, &first.as_ref().context);
    }

    unreachable!("the first thread's context never switches back to boot");
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    arch::entry::arch_panic_handler(info);
    arch::halt();
}

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    arch::halt();
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler. Panic is intentional: heap exhaustion in
/// a no_std kernel has no recovery path. The `alloc_error_handler` ABI
/// requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}
