//! RAII wrappers for kernel resources: ensure cleanup happens on every
//! exit path (including an early `?`) without the caller having to
//! remember it.

use core::ops::Deref;

use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::PhysAddr;

/// Owns one physical frame; returns it to the allocator on drop unless
/// `leak`ed. Used for a frame allocated speculatively (e.g. while
/// building a multi-frame structure) that might need to be abandoned
/// partway through on an error path.
pub struct FrameGuard {
    frame: PhysAddr,
    allocator: &'static FrameAllocator,
}

impl FrameGuard {
    pub fn new(frame: PhysAddr, allocator: &'static FrameAllocator) -> Self {
        Self { frame, allocator }
    }

    pub fn addr(&self) -> PhysAddr {
        self.frame
    }

    /// Release ownership of the frame without freeing it -- the caller
    /// has handed it off to something else that now owns its lifetime.
    pub fn leak(self) -> PhysAddr {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.allocator.free_frame(self.frame);
    }
}

impl Deref for FrameGuard {
    type Target = PhysAddr;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

/// Runs an arbitrary closure on drop unless cancelled. The general tool
/// behind `FrameGuard`-style cleanup for resources that don't warrant
/// their own dedicated guard type.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup: the scope completed its happy path and no
    /// longer wants the closure to run.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_guard_frees_frame_on_drop() {
        let allocator = alloc::boxed::Box::leak(alloc::boxed::Box::new(FrameAllocator::new()));
        #[repr(align(4096))]
        struct Pool([u8; 4096 * 4]);
        let pool = alloc::boxed::Box::leak(alloc::boxed::Box::new(Pool([0; 4096 * 4])));
        let start = pool.0.as_ptr() as u32;
        allocator.init(start, start + 4096 * 4);

        let frame = allocator.alloc_frame().unwrap();
        assert_eq!(allocator.free_count(), 3);
        {
            let _guard = FrameGuard::new(frame, allocator);
        }
        assert_eq!(allocator.free_count(), 4);
    }

    #[test]
    fn frame_guard_leak_keeps_frame_allocated() {
        let allocator = alloc::boxed::Box::leak(alloc::boxed::Box::new(FrameAllocator::new()));
        #[repr(align(4096))]
        struct Pool([u8; 4096 * 4]);
        let pool = alloc::boxed::Box::leak(alloc::boxed::Box::new(Pool([0; 4096 * 4])));
        let start = pool.0.as_ptr() as u32;
        allocator.init(start, start + 4096 * 4);

        let frame = allocator.alloc_frame().unwrap();
        let guard = FrameGuard::new(frame, allocator);
        let leaked = guard.leak();
        assert_eq!(leaked, frame);
        assert_eq!(allocator.free_count(), 3);
    }

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
