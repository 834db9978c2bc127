//! The handful of multiboot info fields `mm::init` needs: how much
//! physical memory exists above 1 MiB. Matches the `flags` bits the boot
//! header requests (`arch::x86::boot::MULTIBOOT_FLAGS`, bit 0: page-align
//! modules, bit 1: memory info present).

#[repr(C)]
struct RawInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
}

pub struct MultibootInfo {
    /// KiB of memory above the 1 MiB mark, as reported by the bootloader.
    pub mem_upper_kib: u32,
}

impl MultibootInfo {
    /// Read the fields this kernel cares about out of the info structure
    /// GRUB left at the physical address passed to `kernel_entry`.
    ///
    /// # Safety
    /// `info_addr` must be the multiboot info pointer `_start` received
    /// from the bootloader in `ebx`, read before paging remaps anything
    /// at this physical address.
    pub unsafe fn read(info_addr: u32) -> Self {
        // SAFETY: delegated to caller.
        let raw = unsafe { &*(info_addr as *const RawInfo) };
        debug_assert!(raw.flags & 0x1 != 0, "bootloader did not provide memory info");
        MultibootInfo {
            mem_upper_kib: raw.mem_upper,
        }
    }
}
