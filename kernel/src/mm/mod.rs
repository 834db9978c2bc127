//! Memory management: physical frames (component C), page tables
//! (component D), and the per-task region map built on top of them
//! (component E).
//!
//! `init` brings these up in dependency order at boot, before any task
//! exists: frame pool first (needed to build the first page directory),
//! then the kernel page-table template and paging itself, then the
//! kernel heap.

pub mod frame_allocator;
pub mod heap;
pub mod multiboot;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;
pub mod vas;

use multiboot::MultibootInfo;
use page_table::{Directory, Entry, PteFlags};

/// Physical address. 32-bit: this is a two-level x86 paging kernel, not
/// PAE, so every address fits comfortably.
pub type PhysAddr = u32;
/// Virtual address, same width as `PhysAddr` in 32-bit protected mode.
pub type VirtAddr = u32;

pub const FRAME_SIZE: usize = 4096;

/// End of the kernel image, provided by the linker script. Physical
/// memory from here to `mem_upper` is the frame pool.
unsafe extern "C" {
    static __kernel_end: u8;
}

/// Low region identity-mapped read-write for every task: the kernel
/// image itself plus the frame pool's bootstrap range, so kernel code
/// and the frame allocator's scratch-free bootstrap phase both keep
/// working unchanged once paging is live.
const KERNEL_IDENTITY_LIMIT: VirtAddr = 16 * 1024 * 1024; // 16 MiB

/// Bring up physical frames, paging, and the kernel heap. Returns the
/// boot page directory; the caller (`kernel_entry`) folds it into the
/// first task's `AddressSpace` rather than this module owning it, since
/// `mm` otherwise has no notion of tasks.
///
/// # Safety
/// Called exactly once, early in `kernel_entry`, before any other `mm`
/// function and before interrupts are enabled. `multiboot_info` must be
/// the physical address `_start` received from the bootloader.
pub unsafe fn init(multiboot_info: u32) -> Directory {
    // SAFETY: called before paging remaps this physical address.
    let info = unsafe { MultibootInfo::read(multiboot_info) };
    let mem_end: PhysAddr = 1024 * 1024 + info.mem_upper_kib * 1024;
    // SAFETY: provided by the linker script; valid for address-of only.
    let kernel_end = unsafe { &__kernel_end as *const u8 as PhysAddr };
    let pool_start = align_up(kernel_end, FRAME_SIZE as u32);

    frame_allocator::FRAME_ALLOCATOR.init(pool_start, align_down(mem_end, FRAME_SIZE as u32));

    let template = build_kernel_template();
    page_table::install_kernel_template(template);

    // SAFETY: the frame pool exists; this is the one-time bootstrap
    // directory build, called before paging is enabled.
    let boot_directory = unsafe { Directory::new_boot().expect("boot directory allocation") };

    // SAFETY: `phys` is a fully populated, self-mapped directory.
    unsafe {
        crate::arch::write_cr3(boot_directory.phys());
        crate::arch::enable_paging();
    }

    frame_allocator::set_link_accessor(page_table::scratch_link_accessor);

    heap::init();

    boot_directory
}

fn align_up(addr: u32, align: u32) -> u32 {
    (addr + align - 1) & !(align - 1)
}

fn align_down(addr: u32, align: u32) -> u32 {
    addr & !(align - 1)
}

/// Identity-map `[0, KERNEL_IDENTITY_LIMIT)` read-write-global. Copied
/// into every directory `Directory::new`/`new_boot` builds.
fn build_kernel_template() -> [Entry; page_table::ENTRIES_PER_TABLE] {
    let mut template = [Entry::empty(); page_table::ENTRIES_PER_TABLE];
    let tomes = KERNEL_IDENTITY_LIMIT / page_table::TOME_SIZE;
    for i in 0..tomes as usize {
        let frame = (i as u32) * page_table::TOME_SIZE;
        template[i] = identity_table_entry(frame);
    }
    template
}

/// Placeholder entry swapped for a real page-table frame the first time
/// `mm::init` needs one identity-mapped tome populated; large-page
/// support would replace this with a single PSE PDE, but this kernel
/// never enables PSE, so every tome still needs its own page table.
///
/// Built eagerly here because `Directory::new_boot`/`new` only copy
/// *present* template entries; the identity tables themselves are
/// constructed once, up front, directly (paging is not yet enabled, so
/// physical addresses are plain pointers).
fn identity_table_entry(tome_base: PhysAddr) -> Entry {
    let table_phys = frame_allocator::FRAME_ALLOCATOR
        .alloc_frame()
        .expect("identity table frame");
    // SAFETY: called before paging is enabled; physical == accessible.
    unsafe {
        let entries = table_phys as *mut Entry;
        for i in 0..page_table::ENTRIES_PER_TABLE {
            let frame = tome_base + (i as u32) * FRAME_SIZE as u32;
            entries.add(i).write(Entry::new(
                frame,
                PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::GLOBAL,
            ));
        }
    }
    Entry::new(table_phys, PteFlags::PRESENT | PteFlags::WRITABLE)
}
