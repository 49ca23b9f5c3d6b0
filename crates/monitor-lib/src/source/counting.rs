//! Live-allocation counting wrapper for a global allocator

use std::alloc::{GlobalAlloc, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

/// Wraps a [`GlobalAlloc`] and counts live allocations.
///
/// Install it as the process allocator:
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: CountingAllocator<tikv_jemallocator::Jemalloc> =
///     CountingAllocator::new(tikv_jemallocator::Jemalloc);
/// ```
pub struct CountingAllocator<A> {
    inner: A,
    allocations: AtomicU64,
    deallocations: AtomicU64,
}

impl<A> CountingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
        }
    }

    /// Number of allocations not yet freed
    pub fn live_objects(&self) -> u64 {
        // Frees are read first so a concurrent alloc/free pair never
        // underflows the difference.
        let freed = self.deallocations.load(Ordering::Relaxed);
        let allocated = self.allocations.load(Ordering::Relaxed);
        allocated.saturating_sub(freed)
    }

    /// Total allocations made since start
    pub fn total_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

// SAFETY: every call is forwarded unchanged to the wrapped allocator; the
// counters have no effect on the returned memory.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            self.allocations.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.allocations.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }

    // A successful realloc keeps the object count unchanged
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        self.inner.realloc(ptr, layout, new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::System;

    #[test]
    fn test_counts_live_allocations() {
        let allocator = CountingAllocator::new(System);
        let layout = Layout::from_size_align(64, 8).unwrap();

        unsafe {
            let a = allocator.alloc(layout);
            let b = allocator.alloc_zeroed(layout);
            assert_eq!(allocator.live_objects(), 2);

            allocator.dealloc(a, layout);
            assert_eq!(allocator.live_objects(), 1);

            let b = allocator.realloc(b, layout, 256);
            assert_eq!(allocator.live_objects(), 1);

            allocator.dealloc(b, Layout::from_size_align(256, 8).unwrap());
        }

        assert_eq!(allocator.live_objects(), 0);
        assert_eq!(allocator.total_allocations(), 2);
    }
}
