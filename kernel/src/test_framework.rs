//! Bare-metal `#[test]` support (`target_os = "none"` only). Host builds
//! use the ordinary libtest harness instead; this module exists purely so
//! `cargo test` can also run inside QEMU via the `custom_test_frameworks`
//! runner wired up in `lib.rs`.

use core::panic::PanicInfo;

use crate::arch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

const ISA_DEBUG_EXIT_PORT: u16 = 0xf4;

/// Write to QEMU's `isa-debug-exit` device, which shuts the VM down with
/// an exit code derived from the value written. Set up by this project's
/// (unwritten, operator-provided) QEMU invocation; a run without that
/// device configured just never returns from this call.
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    // SAFETY: a single word-sized write to a port that either exists (and
    // shuts the VM down) or silently discards the write.
    unsafe { arch::outw(ISA_DEBUG_EXIT_PORT, exit_code as u32 as u16) };
    arch::halt();
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        crate::serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        crate::serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    crate::serial_println!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    crate::serial_println!("[failed]\n");
    crate::serial_println!("{}", info);
    exit_qemu(QemuExitCode::Failed)
}
