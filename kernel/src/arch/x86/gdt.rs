//! Global Descriptor Table and Task State Segment for 32-bit protected mode.
//!
//! Segmentation is flat (base 0, limit 4GiB) on every selector; privilege
//! separation comes entirely from each descriptor's DPL and from paging.
//! The TSS is used only for its `esp0`/`ss0` fields: the stack the CPU
//! switches to on a ring 3 -> ring 0 transition (interrupt, trap, syscall).

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;
pub const USER_CS: u16 = 0x18 | 3;
pub const USER_DS: u16 = 0x20 | 3;
pub const TSS_SEL: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, flags: u8) -> Self {
        GdtEntry {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: 0xF0 | (flags & 0x0F),
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, DPL0, 32-bit TSS (available)
            granularity: ((limit >> 16) & 0x0F) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Minimal 32-bit TSS. The CPU only consults esp0/ss0 on a privilege
/// transition; the remaining fields exist because the format requires them.
#[repr(C, packed)]
pub struct Tss {
    prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Tss {
            prev_tss: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

lazy_static! {
    static ref TSS: Mutex<Tss> = Mutex::new(Tss::new());
}

static mut GDT: [GdtEntry; GDT_ENTRIES] = [GdtEntry::null(); GDT_ENTRIES];

/// Build, load, and activate the GDT and TSS.
///
/// # Safety
/// Must run exactly once, early in boot, with interrupts disabled, before
/// any code relies on the new selectors.
pub unsafe fn init() {
    let tss_addr = &raw const *TSS.lock() as u32;
    let tss_limit = size_of::<Tss>() as u32 - 1;

    // SAFETY: GDT is written only here, before LGDT runs; nothing else
    // observes it mid-update.
    unsafe {
        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::flat(0x9A, 0x0C); // kernel code, DPL0
        GDT[2] = GdtEntry::flat(0x92, 0x0C); // kernel data, DPL0
        GDT[3] = GdtEntry::flat(0xFA, 0x0C); // user code, DPL3
        GDT[4] = GdtEntry::flat(0xF2, 0x0C); // user data, DPL3
        GDT[5] = GdtEntry::tss(tss_addr, tss_limit);

        let ptr = GdtPointer {
            limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
            base: GDT.as_ptr() as u32,
        };

        core::arch::asm!(
            "lgdt [{0}]",
            "mov ax, {1:x}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "ljmp {2}, 2f",
            "2:",
            "ltr {3:x}",
            in(reg) &ptr,
            in(reg) KERNEL_DS,
            const KERNEL_CS,
            in(reg) TSS_SEL,
            out("ax") _,
        );
    }
}

/// Update the ring-0 stack the CPU switches to on the next privilege
/// transition. Called by the scheduler on every context switch.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

pub fn kernel_stack() -> u32 {
    TSS.lock().esp0
}
