//! Two-level x86 page tables (spec component D).
//!
//! A directory frame's 1024 PDEs each cover a 4 MiB "tome"; a present PDE
//! points at a page-table frame of 1024 PTEs, each covering one 4 KiB
//! page. The directory carries a self-referential entry at a fixed index
//! so that, while a directory is the one loaded into CR3, its own PDEs
//! and every tome's PTEs are reachable at constant virtual addresses
//! derived purely from the self-ref index -- no separate bookkeeping.
//!
//! Manipulating a directory that *isn't* currently active (building a
//! fresh one for `fork`, walking a child's soon-to-be-installed tables)
//! goes through a second fixed slot: a one-page scratch window that maps
//! whatever physical frame is of interest for the duration of a single
//! operation. This is the same "reserved scratch virtual address"
//! technique `frame_allocator::free_frame` relies on.

use bitflags::bitflags;

use crate::arch;
use crate::error::KernelError;
use crate::mm::frame_allocator::FRAME_ALLOCATOR;
use crate::mm::{PhysAddr, VirtAddr, FRAME_SIZE};
use crate::sync::spinlock::Ticket;

pub const ENTRIES_PER_TABLE: usize = 1024;
const PDE_SHIFT: u32 = 22;
const PTE_SHIFT: u32 = 12;
pub const TOME_SIZE: u32 = 1 << PDE_SHIFT;

/// Last directory slot: the self-referential entry.
const SELF_REF_INDEX: usize = 1023;
/// Second-to-last slot: the scratch window for touching an inactive
/// directory or table frame.
const SCRATCH_INDEX: usize = 1022;

const DIRECTORY_VADDR: u32 = (SELF_REF_INDEX as u32) << PDE_SHIFT;
const SCRATCH_VADDR: u32 = (SCRATCH_INDEX as u32) << PDE_SHIFT;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const GLOBAL        = 1 << 8;
        /// Software-reserved bit: this mapping is the shared ZFOD sentinel.
        const ZFOD          = 1 << 9;
    }
}

/// A single page-table or page-directory entry. The encoding is
/// identical at both levels, which is what makes the self-ref trick work.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Entry(u32);

impl Entry {
    pub const fn empty() -> Self {
        Entry(0)
    }

    pub fn new(frame: PhysAddr, flags: PteFlags) -> Self {
        Entry((frame & !0xFFF) | flags.bits())
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn frame(self) -> PhysAddr {
        self.0 & !0xFFF
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    pub fn is_zfod(self) -> bool {
        self.flags().contains(PteFlags::ZFOD)
    }
}

fn pde_index(v: VirtAddr) -> usize {
    (v >> PDE_SHIFT) as usize & (ENTRIES_PER_TABLE - 1)
}

fn pte_index(v: VirtAddr) -> usize {
    (v >> PTE_SHIFT) as usize & (ENTRIES_PER_TABLE - 1)
}

pub fn tome_base(v: VirtAddr) -> VirtAddr {
    v & !(TOME_SIZE - 1)
}

/// The kernel-region template copied into every new directory: low
/// memory, identity-mapped, global so it survives a CR3 switch. Installed
/// once at boot by `mm::init`.
static KERNEL_TEMPLATE: Ticket<[Entry; ENTRIES_PER_TABLE]> =
    Ticket::new([Entry::empty(); ENTRIES_PER_TABLE]);

pub fn install_kernel_template(entries: [Entry; ENTRIES_PER_TABLE]) {
    *KERNEL_TEMPLATE.lock() = entries;
}

/// Serializes scratch-window use. Single-CPU, so contention only ever
/// comes from the current thread nesting calls, which none of the
/// methods below do.
static SCRATCH_LOCK: Ticket<()> = Ticket::new(());

/// Map `frame` into the scratch window, run `f` against its contents,
/// then unmap. Requires a directory with the self-ref entry already
/// active in CR3 (true for every directory this module constructs).
fn with_scratch<R>(frame: PhysAddr, f: impl FnOnce(*mut u8) -> R) -> R {
    let _guard = SCRATCH_LOCK.lock();
    // SAFETY: the active directory's self-ref entry makes its own PDE
    // array addressable at DIRECTORY_VADDR; writing SCRATCH_INDEX there
    // maps `frame` at SCRATCH_VADDR for the duration of this call.
    unsafe {
        let directory = DIRECTORY_VADDR as *mut Entry;
        directory
            .add(SCRATCH_INDEX)
            .write(Entry::new(frame, PteFlags::PRESENT | PteFlags::WRITABLE));
        arch::tlb_flush_address(SCRATCH_VADDR);
        let result = f(SCRATCH_VADDR as *mut u8);
        directory.add(SCRATCH_INDEX).write(Entry::empty());
        arch::tlb_flush_address(SCRATCH_VADDR);
        result
    }
}

/// Zero an entire frame through the scratch window. Used to scrub a
/// freshly allocated data page before it is mapped into user space.
pub fn scratch_zero(frame: PhysAddr) {
    with_scratch(frame, |base| {
        // SAFETY: `base` grants exclusive byte access to `frame` for the
        // duration of this call.
        unsafe { core::ptr::write_bytes(base, 0, FRAME_SIZE) };
    });
}

/// Copy `FRAME_SIZE` bytes from `src` into `dst_frame` via the scratch
/// window. Used by `vas::AddressSpace::copy_into` (fork).
///
/// # Safety
/// `src` must be valid for reads of `FRAME_SIZE` bytes in the currently
/// active directory.
pub unsafe fn scratch_copy_from(dst_frame: PhysAddr, src: VirtAddr) {
    with_scratch(dst_frame, |base| {
        // SAFETY: delegated to caller; `base` grants exclusive byte
        // access to `dst_frame` for the duration of this call.
        unsafe { core::ptr::copy_nonoverlapping(src as *const u8, base, FRAME_SIZE) };
    });
}

/// Write a single byte at `offset` within `frame` through the scratch
/// window. Used by `process::exec` to lay out a fresh user stack one
/// word at a time rather than assembling a whole frame up front.
pub fn scratch_write_byte(frame: PhysAddr, offset: u32, byte: u8) {
    with_scratch(frame, |base| {
        // SAFETY: `base` grants exclusive byte access to `frame` for the
        // duration of this call; `offset` is caller-checked to index
        // within a single frame.
        unsafe { base.add(offset as usize).write(byte) };
    });
}

/// Frame allocator link accessor that goes through the scratch window,
/// installed once paging is live (see `frame_allocator::set_link_accessor`).
pub fn scratch_link_accessor(frame: PhysAddr, write: Option<PhysAddr>) -> Option<PhysAddr> {
    with_scratch(frame, |base| {
        let ptr = base as *mut u32;
        match write {
            // SAFETY: `frame` is known free; the scratch window grants
            // byte access to it for the closure's duration.
            Some(next) => unsafe {
                ptr.write(next);
                None
            },
            None => {
                let raw = unsafe { ptr.read() };
                if raw == 0 {
                    None
                } else {
                    Some(raw)
                }
            }
        }
    })
}

/// One task's page directory. Frees its own directory frame on drop;
/// page-table frames and mapped data frames are the region map's
/// responsibility (`vas::AddressSpace::free` tears those down first).
pub struct Directory {
    phys: PhysAddr,
}

impl Directory {
    /// Build the very first directory, before paging is enabled. At this
    /// point physical addresses are directly accessible, so this bypasses
    /// the scratch window entirely.
    ///
    /// # Safety
    /// Must be called at most once, before `arch::enable_paging`.
    pub unsafe fn new_boot() -> Result<Self, KernelError> {
        let phys = FRAME_ALLOCATOR.alloc_frame()?;
        // SAFETY: paging is not yet enabled; `phys` is directly addressable.
        unsafe {
            core::ptr::write_bytes(phys as *mut u8, 0, FRAME_SIZE);
            let entries = phys as *mut Entry;
            for (i, e) in KERNEL_TEMPLATE.lock().iter().enumerate() {
                if e.is_present() {
                    entries.add(i).write(*e);
                }
            }
            entries
                .add(SELF_REF_INDEX)
                .write(Entry::new(phys, PteFlags::PRESENT | PteFlags::WRITABLE));
        }
        Ok(Directory { phys })
    }

    /// Build a directory for a new task. Requires some directory to
    /// already be active in CR3 (true for any call after boot).
    pub fn new() -> Result<Self, KernelError> {
        let phys = FRAME_ALLOCATOR.alloc_frame()?;
        with_scratch(phys, |base| {
            // SAFETY: `base` is a freshly allocated frame, exclusively
            // reachable through the scratch window for this call.
            unsafe {
                core::ptr::write_bytes(base, 0, FRAME_SIZE);
                let entries = base as *mut Entry;
                for (i, e) in KERNEL_TEMPLATE.lock().iter().enumerate() {
                    if e.is_present() {
                        entries.add(i).write(*e);
                    }
                }
                entries
                    .add(SELF_REF_INDEX)
                    .write(Entry::new(phys, PteFlags::PRESENT | PteFlags::WRITABLE));
            }
        });
        Ok(Directory { phys })
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    pub fn cr3(&self) -> PhysAddr {
        self.phys
    }

    fn is_active(&self) -> bool {
        arch::read_cr3() == self.phys
    }

    fn read_pde(&self, pdi: usize) -> Entry {
        with_scratch(self.phys, |base| unsafe {
            (base as *const Entry).add(pdi).read()
        })
    }

    fn write_pde(&self, pdi: usize, entry: Entry) {
        with_scratch(self.phys, |base| unsafe {
            (base as *mut Entry).add(pdi).write(entry);
        });
    }

    /// Allocate and install a page table for the tome covering `vaddr` if
    /// one isn't already present. Callers of `set_pte` must do this first.
    pub fn ensure_table(&self, vaddr: VirtAddr) -> Result<(), KernelError> {
        let pdi = pde_index(vaddr);
        if self.read_pde(pdi).is_present() {
            return Ok(());
        }
        let table_phys = FRAME_ALLOCATOR.alloc_frame()?;
        with_scratch(table_phys, |base| unsafe {
            core::ptr::write_bytes(base, 0, FRAME_SIZE);
        });
        self.write_pde(
            pdi,
            Entry::new(table_phys, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER),
        );
        Ok(())
    }

    /// Install a PTE. Errors if the enclosing PDE is absent; the caller
    /// must `ensure_table` first.
    pub fn set_pte(&self, vaddr: VirtAddr, entry: Entry) -> Result<(), KernelError> {
        let pdi = pde_index(vaddr);
        let pde = self.read_pde(pdi);
        if !pde.is_present() {
            return Err(KernelError::InvalidState {
                expected: "page table present",
                actual: "no page table installed for this tome",
            });
        }
        let pti = pte_index(vaddr);
        with_scratch(pde.frame(), |base| unsafe {
            (base as *mut Entry).add(pti).write(entry);
        });
        if self.is_active() {
            arch::tlb_flush_address(vaddr);
        }
        Ok(())
    }

    pub fn get_pte(&self, vaddr: VirtAddr) -> Option<Entry> {
        let pde = self.read_pde(pde_index(vaddr));
        if !pde.is_present() {
            return None;
        }
        let pti = pte_index(vaddr);
        Some(with_scratch(pde.frame(), |base| unsafe {
            (base as *const Entry).add(pti).read()
        }))
    }

    /// Clear a PTE and return what it held, if anything.
    pub fn clear_pte(&self, vaddr: VirtAddr) -> Option<Entry> {
        let prev = self.get_pte(vaddr)?;
        let _ = self.set_pte(vaddr, Entry::empty());
        Some(prev)
    }

    /// True if the tome containing `vaddr` has no page table, or a page
    /// table with no present entries left.
    pub fn tome_is_empty(&self, vaddr: VirtAddr) -> bool {
        let pde = self.read_pde(pde_index(vaddr));
        if !pde.is_present() {
            return true;
        }
        with_scratch(pde.frame(), |base| unsafe {
            (0..ENTRIES_PER_TABLE).all(|i| !(*(base as *const Entry).add(i)).is_present())
        })
    }

    /// Free an emptied tome's page-table frame.
    pub fn free_table(&self, vaddr: VirtAddr) {
        let pdi = pde_index(vaddr);
        let pde = self.read_pde(pdi);
        if pde.is_present() {
            FRAME_ALLOCATOR.free_frame(pde.frame());
            self.write_pde(pdi, Entry::empty());
        }
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        FRAME_ALLOCATOR.free_frame(self.phys);
    }
}
