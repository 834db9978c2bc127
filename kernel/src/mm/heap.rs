//! Kernel heap bootstrap.
//!
//! The kernel heap is a fixed, statically reserved region rather than
//! region-mapped pages: `linked_list_allocator` manages free blocks
//! within it exactly as it would any other backing store. Carved out of
//! the kernel identity mapping, so it is present and writable the
//! instant paging comes up, before any task or its region map exists.

use linked_list_allocator::LockedHeap;

pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[repr(align(4096))]
struct HeapStorage([u8; HEAP_SIZE]);

static mut HEAP_STORAGE: HeapStorage = HeapStorage([0; HEAP_SIZE]);

/// Hand the reserved region to the global allocator. Called once from
/// `mm::init`, after paging (and so the kernel identity mapping) is live.
pub fn init() {
    // SAFETY: `HEAP_STORAGE` is this module's sole reference to the
    // region, and this function runs exactly once before any allocation.
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_STORAGE) as *mut u8;
        crate::ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    #[test]
    fn alloc_after_init_round_trips() {
        let static_allocator = linked_list_allocator::LockedHeap::empty();
        let mut backing = alloc::boxed::Box::new([0u8; 4096]);
        // SAFETY: `backing` outlives `static_allocator`'s use below.
        unsafe {
            static_allocator.lock().init(backing.as_mut_ptr(), backing.len());
        }
        let layout = core::alloc::Layout::from_size_align(64, 8).unwrap();
        let ptr = unsafe { static_allocator.lock().allocate_first_fit(layout).unwrap() };
        let mut v: Vec<u8> = Vec::with_capacity(0);
        v.push(1);
        unsafe { static_allocator.lock().deallocate(ptr, layout) };
    }
}
