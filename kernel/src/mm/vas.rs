//! Per-task address space: a sorted region list layered on top of a
//! page `Directory` (spec component E).
//!
//! Every page a task can touch belongs to exactly one `Region`, which
//! records its own protection flags independent of the PTEs currently
//! installed for it -- `set_attrs` changes the region's flags and only
//! then walks existing mappings to bring them in line, which is what
//! lets `alloc` hand out pages lazily (no mapping at all until the first
//! fault) without losing track of what protection they're supposed to
//! have once they are mapped.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::KernelError;
use crate::mm::frame_allocator::FRAME_ALLOCATOR;
use crate::mm::page_table::{Directory, Entry, PteFlags};
use crate::mm::{PhysAddr, VirtAddr, FRAME_SIZE};

bitflags::bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const WRITABLE = 1 << 0;
        const USER     = 1 << 1;
        /// New pages in this region start out backed by the shared
        /// zero-fill-on-demand sentinel frame rather than a freshly
        /// allocated one; a write fault is what actually gives a page
        /// its own frame.
        const ZFOD     = 1 << 2;
    }
}

impl RegionFlags {
    fn pte_flags(self) -> PteFlags {
        let mut f = PteFlags::PRESENT;
        if self.contains(RegionFlags::WRITABLE) {
            f |= PteFlags::WRITABLE;
        }
        if self.contains(RegionFlags::USER) {
            f |= PteFlags::USER;
        }
        f
    }
}

#[derive(Clone, Copy)]
struct Region {
    start: VirtAddr,
    len: u32,
    flags: RegionFlags,
}

impl Region {
    fn end(&self) -> VirtAddr {
        self.start + self.len
    }

    fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// The shared read-only all-zero frame every ZFOD page starts out
/// mapped to. Allocated once, lazily, never freed; never appears on the
/// frame allocator's free list once claimed.
static ZFOD_FRAME: Mutex<Option<PhysAddr>> = Mutex::new(None);

fn zfod_frame() -> Result<PhysAddr, KernelError> {
    let mut slot = ZFOD_FRAME.lock();
    if let Some(frame) = *slot {
        return Ok(frame);
    }
    let frame = FRAME_ALLOCATOR.alloc_frame()?;
    zero_frame(frame);
    *slot = Some(frame);
    Ok(frame)
}

fn zero_frame(frame: PhysAddr) {
    crate::mm::page_table::scratch_zero(frame);
}

pub struct AddressSpace {
    directory: Directory,
    regions: Mutex<Vec<Region>>,
}

impl AddressSpace {
    pub fn new() -> Result<Self, KernelError> {
        Ok(AddressSpace {
            directory: Directory::new()?,
            regions: Mutex::new(Vec::new()),
        })
    }

    /// Adopt an already-built directory (the boot directory `mm::init`
    /// constructed before any task existed).
    pub fn from_directory(directory: Directory) -> Self {
        AddressSpace {
            directory,
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn cr3(&self) -> PhysAddr {
        self.directory.cr3()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Self {
        test_support::init_test_frame_pool();
        // SAFETY: the host test target never enables real paging, so
        // every physical address is already directly addressable -- the
        // same condition the boot-time constructor assumes.
        let directory = unsafe { Directory::new_boot().expect("test frame pool exhausted") };
        AddressSpace {
            directory,
            regions: Mutex::new(Vec::new()),
        }
    }

    fn find_region_idx(regions: &[Region], addr: VirtAddr) -> Option<usize> {
        regions.iter().position(|r| r.contains(addr))
    }

    fn overlaps(regions: &[Region], start: VirtAddr, len: u32) -> bool {
        let end = start + len;
        regions.iter().any(|r| start < r.end() && r.start < end)
    }

    /// Unmap every page in `[start, end)`, freeing its backing frame
    /// (unless it's the shared ZFOD sentinel) and any page-table frame
    /// left empty behind it. Shared by `free` and `alloc`'s rollback on
    /// partial failure.
    fn unmap_range(&self, start: VirtAddr, end: VirtAddr) {
        let mut addr = start;
        while addr < end {
            if let Some(entry) = self.directory.clear_pte(addr) {
                if entry.is_present() && !entry.is_zfod() {
                    FRAME_ALLOCATOR.free_frame(entry.frame());
                }
                if self.directory.tome_is_empty(addr) {
                    self.directory.free_table(addr);
                }
            }
            addr += FRAME_SIZE as u32;
        }
    }

    /// Reserve `[start, start+len)` (both page-aligned) with `flags`. No
    /// frames are allocated yet -- pages are backed lazily, either by the
    /// ZFOD sentinel (if `flags` requests it) or on first `page_fault`.
    pub fn alloc(&self, start: VirtAddr, len: u32, flags: RegionFlags) -> Result<(), KernelError> {
        debug_assert_eq!(start % FRAME_SIZE as u32, 0);
        debug_assert_eq!(len % FRAME_SIZE as u32, 0);
        let mut regions = self.regions.lock();
        if Self::overlaps(&regions, start, len) {
            return Err(KernelError::RegionOverlap {
                addr: start as usize,
                len: len as usize,
            });
        }
        if flags.contains(RegionFlags::ZFOD) {
            let sentinel = zfod_frame()?;
            // Read-only-but-user: a CPL-3 read of an unwritten ZFOD page
            // must see the sentinel, not fault forever on a PTE that
            // looks present but U/S=0. `ensure_mapped`'s write path is
            // what actually upgrades the page off the sentinel.
            let sentinel_flags = (flags.pte_flags() & !PteFlags::WRITABLE) | PteFlags::ZFOD;
            let mut addr = start;
            let mut result = Ok(());
            while addr < start + len {
                result = self
                    .directory
                    .ensure_table(addr)
                    .and_then(|_| self.directory.set_pte(addr, Entry::new(sentinel, sentinel_flags)));
                if result.is_err() {
                    break;
                }
                addr += FRAME_SIZE as u32;
            }
            if let Err(e) = result {
                self.unmap_range(start, addr);
                return Err(e);
            }
        }
        regions.push(Region { start, len, flags });
        Ok(())
    }

    /// Release `[start, start+len)`: unmap and free every backed page,
    /// drop the region record. `len` need not match the original
    /// `alloc`'s exactly; a caller may free a sub-range, which splits the
    /// surviving region(s).
    pub fn free(&self, start: VirtAddr, len: u32) -> Result<(), KernelError> {
        let mut regions = self.regions.lock();
        let end = start + len;
        self.unmap_range(start, end);
        let mut rebuilt = Vec::with_capacity(regions.len());
        for r in regions.iter() {
            if r.end() <= start || r.start >= end {
                rebuilt.push(*r);
                continue;
            }
            if r.start < start {
                rebuilt.push(Region {
                    start: r.start,
                    len: start - r.start,
                    flags: r.flags,
                });
            }
            if r.end() > end {
                rebuilt.push(Region {
                    start: end,
                    len: r.end() - end,
                    flags: r.flags,
                });
            }
        }
        *regions = rebuilt;
        Ok(())
    }

    pub fn set_attrs(&self, start: VirtAddr, len: u32, flags: RegionFlags) -> Result<(), KernelError> {
        let mut regions = self.regions.lock();
        let idx = Self::find_region_idx(&regions, start).ok_or(KernelError::UnmappedMemory {
            addr: start as usize,
        })?;
        regions[idx].flags = flags;
        let region = regions[idx];
        drop(regions);
        let mut addr = region.start;
        while addr < region.end() && addr < start + len {
            if let Some(entry) = self.directory.get_pte(addr) {
                if entry.is_present() {
                    let preserved_zfod = if entry.is_zfod() { PteFlags::ZFOD } else { PteFlags::empty() };
                    self.directory
                        .set_pte(addr, Entry::new(entry.frame(), flags.pte_flags() | preserved_zfod))?;
                }
            }
            addr += FRAME_SIZE as u32;
        }
        Ok(())
    }

    pub fn get_attrs(&self, addr: VirtAddr) -> Option<RegionFlags> {
        let regions = self.regions.lock();
        let idx = Self::find_region_idx(&regions, addr)?;
        Some(regions[idx].flags)
    }

    /// Physical frame currently backing `addr`'s page, if mapped.
    /// `process::exec` uses this to write loaded segment/stack content
    /// into a not-yet-active address space through the scratch window.
    pub(crate) fn frame_at(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let page = addr & !(FRAME_SIZE as u32 - 1);
        self.directory.get_pte(page).filter(|e| e.is_present()).map(|e| e.frame())
    }

    /// Length of the region that starts exactly at `addr`, if any.
    /// `remove_pages` only takes a base address, not a length, so it
    /// needs this to find the full extent of what an earlier `new_pages`
    /// (i.e. `alloc`) handed out at that address.
    pub fn region_starting_at(&self, addr: VirtAddr) -> Option<u32> {
        let regions = self.regions.lock();
        regions.iter().find(|r| r.start == addr).map(|r| r.len)
    }

    /// Unmap and free every region. Called once by task teardown
    /// (`process::vanish`), before the `Directory` itself is dropped
    /// (which frees the directory frame).
    pub fn free_all(&self) {
        let ranges: Vec<(VirtAddr, u32)> = {
            let regions = self.regions.lock();
            regions.iter().map(|r| (r.start, r.len)).collect()
        };
        for (start, len) in ranges {
            let _ = self.free(start, len);
        }
    }

    /// Deep-copy every region and backed page into `dst` (used by
    /// `fork`). ZFOD pages stay ZFOD -- both address spaces keep sharing
    /// the sentinel frame until either actually writes to one.
    ///
    /// # Safety
    /// `self` must be the address space currently active in CR3 (true of
    /// every `fork` caller, which is running in its own address space).
    pub unsafe fn copy_into(&self, dst: &AddressSpace) -> Result<(), KernelError> {
        let regions = self.regions.lock();
        let mut dst_regions = dst.regions.lock();
        for r in regions.iter() {
            dst_regions.push(*r);
            let mut addr = r.start;
            while addr < r.end() {
                if let Some(entry) = self.directory.get_pte(addr) {
                    if entry.is_present() {
                        dst.directory.ensure_table(addr)?;
                        if entry.is_zfod() {
                            dst.directory.set_pte(addr, entry)?;
                        } else {
                            let new_frame = FRAME_ALLOCATOR.alloc_frame()?;
                            // SAFETY: `addr` is mapped and present in the
                            // active directory, so it is directly
                            // readable; `new_frame` reaches the scratch
                            // window exclusively for this copy.
                            unsafe {
                                crate::mm::page_table::scratch_copy_from(new_frame, addr);
                            }
                            dst.directory
                                .set_pte(addr, Entry::new(new_frame, entry.flags()))?;
                        }
                    }
                }
                addr += FRAME_SIZE as u32;
            }
        }
        Ok(())
    }

    /// Handle a page fault at `addr`. Returns `Ok(())` if the fault was
    /// satisfied (ZFOD conversion, or first touch of a lazily backed
    /// page); `Err` means the task has no business touching `addr` and
    /// the caller should deliver to a registered handler or kill it.
    pub fn page_fault(&self, addr: VirtAddr, write: bool) -> Result<(), KernelError> {
        self.ensure_mapped(addr, write)
    }

    /// Make sure `addr`'s page is mapped with at least `write`'s access,
    /// backing it (and converting a ZFOD mapping) if necessary. A no-op
    /// if the page is already present and already allows the access --
    /// this is what lets `user_validation` call the same path the fault
    /// handler uses without it misreading an already-valid page as a
    /// protection violation.
    pub fn ensure_mapped(&self, addr: VirtAddr, write: bool) -> Result<(), KernelError> {
        let regions = self.regions.lock();
        let idx = Self::find_region_idx(&regions, addr).ok_or(KernelError::UnmappedMemory {
            addr: addr as usize,
        })?;
        let region = regions[idx];
        drop(regions);
        if write && !region.flags.contains(RegionFlags::WRITABLE) {
            return Err(KernelError::InvalidAddress { addr: addr as usize });
        }

        let page = addr & !(FRAME_SIZE as u32 - 1);
        match self.directory.get_pte(page) {
            Some(e) if e.is_present() && e.is_zfod() && write => {
                let frame = FRAME_ALLOCATOR.alloc_frame()?;
                zero_frame(frame);
                self.directory
                    .set_pte(page, Entry::new(frame, region.flags.pte_flags()))?;
                Ok(())
            }
            Some(e) if e.is_present() => Ok(()),
            _ => {
                let frame = FRAME_ALLOCATOR.alloc_frame()?;
                zero_frame(frame);
                self.directory.ensure_table(page)?;
                self.directory
                    .set_pte(page, Entry::new(frame, region.flags.pte_flags()))?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test_support {
    use std::sync::Once;

    pub fn init_test_frame_pool() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            const FRAMES: usize = 64;
            #[repr(align(4096))]
            struct Pool([u8; crate::mm::FRAME_SIZE * FRAMES]);
            let pool = alloc::boxed::Box::leak(alloc::boxed::Box::new(Pool(
                [0; crate::mm::FRAME_SIZE * FRAMES],
            )));
            let start = pool.0.as_ptr() as u32;
            let end = start + (crate::mm::FRAME_SIZE * FRAMES) as u32;
            crate::mm::frame_allocator::FRAME_ALLOCATOR.init(start, end);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_fault_backs_a_page() {
        let vas = AddressSpace::new_for_test();
        vas.alloc(0x0040_0000, FRAME_SIZE as u32, RegionFlags::WRITABLE | RegionFlags::USER)
            .unwrap();
        assert!(vas.get_attrs(0x0040_0000).is_some());
        vas.page_fault(0x0040_0000, true).unwrap();
        let entry = vas.directory.get_pte(0x0040_0000).unwrap();
        assert!(entry.is_present());
        assert!(!entry.is_zfod());
    }

    #[test]
    fn zfod_region_shares_sentinel_until_write() {
        let vas = AddressSpace::new_for_test();
        vas.alloc(
            0x0080_0000,
            FRAME_SIZE as u32,
            RegionFlags::WRITABLE | RegionFlags::USER | RegionFlags::ZFOD,
        )
        .unwrap();
        let before = vas.directory.get_pte(0x0080_0000).unwrap();
        assert!(before.is_zfod());
        vas.page_fault(0x0080_0000, true).unwrap();
        let after = vas.directory.get_pte(0x0080_0000).unwrap();
        assert!(!after.is_zfod());
        assert_ne!(before.frame(), after.frame());
    }

    #[test]
    fn free_unmaps_and_returns_frame() {
        let vas = AddressSpace::new_for_test();
        vas.alloc(0x00C0_0000, FRAME_SIZE as u32, RegionFlags::WRITABLE).unwrap();
        vas.page_fault(0x00C0_0000, true).unwrap();
        let before_free = FRAME_ALLOCATOR.free_count();
        vas.free(0x00C0_0000, FRAME_SIZE as u32).unwrap();
        assert!(FRAME_ALLOCATOR.free_count() > before_free);
        assert!(vas.get_attrs(0x00C0_0000).is_none());
    }

    #[test]
    fn overlapping_alloc_is_rejected() {
        let vas = AddressSpace::new_for_test();
        vas.alloc(0x0100_0000, FRAME_SIZE as u32 * 2, RegionFlags::WRITABLE)
            .unwrap();
        let err = vas.alloc(0x0100_0000 + FRAME_SIZE as u32, FRAME_SIZE as u32, RegionFlags::WRITABLE);
        assert!(err.is_err());
    }
}
