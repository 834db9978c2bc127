//! Interrupt Descriptor Table: the syscall/fault entry plane (spec component K).
//!
//! Two gate kinds share the table:
//! - a trap gate (IF left alone) for the software `int 0x80` syscall vector,
//!   so a syscall can itself be preempted by a timer tick mid-copy-in;
//! - interrupt gates (IF cleared on entry) for faults and devices, so a
//!   fault handler runs with interrupts off until it chooses to reopen them.
//!
//! Every handler is a naked entry stub (see `arch::x86::context`) that
//! builds a fixed `ureg` layout and dispatches into `syscall`/`mm::page_fault`;
//! this module only decides gate type, DPL, and target offset.

use lazy_static::lazy_static;
use spin::Mutex;

use super::gdt::KERNEL_CS;

pub const SYSCALL_VECTOR: u8 = 0x80;
pub const TIMER_VECTOR: u8 = 0x20;
pub const KEYBOARD_VECTOR: u8 = 0x21;

const IDT_ENTRIES: usize = 256;

const GATE_PRESENT: u8 = 0x80;
const GATE_TRAP32: u8 = 0x0F;
const GATE_INTR32: u8 = 0x0E;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, dpl: u8, kind: u8) -> Self {
        IdtEntry {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CS,
            zero: 0,
            type_attr: GATE_PRESENT | ((dpl & 0x3) << 5) | kind,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

struct IdtTable([IdtEntry; IDT_ENTRIES]);
// SAFETY: the table is mutated only under `IDT`'s Mutex before LIDT runs,
// and is read-only from the CPU's perspective afterward.
unsafe impl Send for IdtTable {}

lazy_static! {
    static ref IDT: Mutex<IdtTable> = Mutex::new(IdtTable([IdtEntry::missing(); IDT_ENTRIES]));
}

/// Fault vectors, all routed to interrupt gates.
const FAULT_VECTORS: &[(u8, unsafe extern "C" fn())] = &[
    (0, super::context::isr_divide_error),
    (6, super::context::isr_invalid_opcode),
    (13, super::context::isr_general_protection),
    (14, super::context::isr_page_fault),
];

/// Build and load the IDT.
///
/// # Safety
/// Must run once, early in boot, with interrupts disabled.
pub unsafe fn init() {
    let mut idt = IDT.lock();

    for &(vector, handler) in FAULT_VECTORS {
        idt.0[vector as usize] = IdtEntry::new(handler as u32, 0, GATE_INTR32);
    }

    idt.0[SYSCALL_VECTOR as usize] =
        IdtEntry::new(super::context::isr_syscall as u32, 3, GATE_TRAP32);
    idt.0[TIMER_VECTOR as usize] = IdtEntry::new(super::context::isr_timer as u32, 0, GATE_INTR32);
    idt.0[KEYBOARD_VECTOR as usize] =
        IdtEntry::new(super::context::isr_keyboard as u32, 0, GATE_INTR32);

    let ptr = IdtPointer {
        limit: (core::mem::size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.0.as_ptr() as u32,
    };

    // SAFETY: `ptr` points at a fully populated, 256-entry table living in
    // static storage behind the lazy_static Mutex, so it outlives the CPU's
    // use of it.
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &ptr);
    }
}
