//! `new_pages`/`remove_pages` (spec component E's syscall surface): thin
//! wrappers over the calling task's `AddressSpace`.

use crate::mm::vas::RegionFlags;
use crate::sched;

/// `new_pages(addr, len)`: allocate a lazily backed (ZFOD), user-writable
/// region. `addr`/`len` must already be page-aligned; `AddressSpace::alloc`
/// itself rejects anything that overlaps an existing region.
pub fn sys_new_pages(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    let flags = RegionFlags::USER | RegionFlags::WRITABLE | RegionFlags::ZFOD;
    match task.address_space.lock().alloc(args[0], args[1], flags) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// `remove_pages(addr)`: free the region that starts exactly at `addr`.
/// Fails if no region starts there (matching the original's "must match
/// a prior `new_pages` exactly" contract).
pub fn sys_remove_pages(args: [u32; 4]) -> i32 {
    let cur = sched::current();
    // SAFETY: `cur` is the running thread; its task outlives this call.
    let task = unsafe { cur.as_ref().task.as_ref() };
    let vas = task.address_space.lock();
    let Some(len) = vas.region_starting_at(args[0]) else {
        return -1;
    };
    match vas.free(args[0], len) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
