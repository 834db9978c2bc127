//! Physical frame allocator (spec component C).
//!
//! The free pool is an implicit singly-linked list threaded through the
//! frames themselves: a free frame's first machine word holds the
//! physical address of the next free frame (0 terminates the list), so
//! the only bookkeeping state is a head pointer and a count. No bitmap,
//! no separate metadata array -- the frame *is* its own free-list node
//! while it is free.
//!
//! Writing into a free frame requires it to be addressable. Before
//! paging is enabled, physical addresses are directly dereferenceable.
//! Afterward, every access goes through `page_table`'s scratch window,
//! which is exactly the "reserved scratch virtual address" the frame
//! allocator's contract calls for.

use crate::error::KernelError;
use crate::mm::{PhysAddr, FRAME_SIZE};
use crate::sync::spinlock::Ticket;

struct FreeList {
    head: Option<PhysAddr>,
    free_count: usize,
    total_count: usize,
}

pub struct FrameAllocator {
    inner: Ticket<FreeList>,
}

/// Read/write a free frame's link word. Before paging is live this is a
/// direct physical access; `page_table::install_link_accessor` switches
/// it over to the scratch-window path once paging is enabled.
type LinkAccessor = fn(PhysAddr, Option<PhysAddr>) -> Option<PhysAddr>;

fn identity_link_accessor(frame: PhysAddr, write: Option<PhysAddr>) -> Option<PhysAddr> {
    let ptr = frame as *mut u32;
    match write {
        // SAFETY: called only on frames known free and below the paging
        // bring-up point, where physical == accessible address.
        Some(next) => unsafe {
            ptr.write(next.unwrap_or(0));
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
}

static LINK_ACCESSOR: Ticket<LinkAccessor> = Ticket::new(identity_link_accessor as LinkAccessor);

/// Switch the frame allocator's link accessor to one that goes through
/// the page-table scratch window. Called once paging is enabled.
pub fn set_link_accessor(accessor: LinkAccessor) {
    *LINK_ACCESSOR.lock() = accessor;
}

fn read_link(frame: PhysAddr) -> Option<PhysAddr> {
    (LINK_ACCESSOR.lock())(frame, None)
}

fn write_link(frame: PhysAddr, next: Option<PhysAddr>) {
    (LINK_ACCESSOR.lock())(frame, Some(next.unwrap_or(0)));
}

pub static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

impl FrameAllocator {
    pub const fn new() -> Self {
        FrameAllocator {
            inner: Ticket::new(FreeList {
                head: None,
                free_count: 0,
                total_count: 0,
            }),
        }
    }

    /// Populate the pool over the frame-aligned range `[start, end)`.
    /// Called once at boot, before paging is enabled, over whatever
    /// physical memory the multiboot info reports as usable past the end
    /// of the kernel image.
    pub fn init(&self, start: PhysAddr, end: PhysAddr) {
        debug_assert_eq!(start % FRAME_SIZE as u32, 0);
        debug_assert_eq!(end % FRAME_SIZE as u32, 0);
        let mut inner = self.inner.lock();
        let mut head = None;
        let mut count = 0;
        let mut addr = end;
        while addr > start {
            addr -= FRAME_SIZE as u32;
            write_link(addr, head);
            head = Some(addr);
            count += 1;
        }
        inner.head = head;
        inner.free_count = count;
        inner.total_count = count;
    }

    /// Pop the head of the free list. O(1); never blocks.
    pub fn alloc_frame(&self) -> Result<PhysAddr, KernelError> {
        let mut inner = self.inner.lock();
        let frame = inner.head.ok_or(KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: 0,
        })?;
        inner.head = read_link(frame);
        inner.free_count -= 1;
        Ok(frame)
    }

    /// Thread the frame back onto the head of the free list. O(1).
    pub fn free_frame(&self, frame: PhysAddr) {
        let mut inner = self.inner.lock();
        write_link(frame, inner.head);
        inner.head = Some(frame);
        inner.free_count += 1;
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free_count
    }

    pub fn total_count(&self) -> usize {
        self.inner.lock().total_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct FramePool([u8; FRAME_SIZE * 8]);

    #[test]
    fn alloc_and_free_round_trip() {
        let pool = alloc::boxed::Box::new(FramePool([0; FRAME_SIZE * 8]));
        let start = pool.0.as_ptr() as u32;
        let end = start + (FRAME_SIZE * 8) as u32;

        let allocator = FrameAllocator::new();
        allocator.init(start, end);
        assert_eq!(allocator.free_count(), 8);

        let a = allocator.alloc_frame().unwrap();
        let b = allocator.alloc_frame().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.free_count(), 6);

        allocator.free_frame(a);
        assert_eq!(allocator.free_count(), 7);
        let reused = allocator.alloc_frame().unwrap();
        assert_eq!(reused, a, "most-recently-freed frame is reused first");

        core::mem::drop(pool);
    }

    #[test]
    fn exhaustion_fails_without_blocking() {
        let pool = alloc::boxed::Box::new(FramePool([0; FRAME_SIZE * 8]));
        let start = pool.0.as_ptr() as u32;
        let end = start + FRAME_SIZE as u32;

        let allocator = FrameAllocator::new();
        allocator.init(start, end);
        assert!(allocator.alloc_frame().is_ok());
        assert!(allocator.alloc_frame().is_err());

        core::mem::drop(pool);
    }
}
