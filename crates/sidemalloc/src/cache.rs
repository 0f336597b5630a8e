//! Per-thread magazine over the primary backend.
//!
//! Each thread owns a `LocalCache`: one intrusive free list per size class.
//! The fast path pops and pushes without any lock; the primary's per-class
//! mutex is only taken when a list runs dry (batch refill) or overflows
//! (batch return). Draining half a list at twice the cap, rather than the
//! whole list at the cap, keeps a ping-ponging alloc/free pattern from
//! hitting the primary on every call.

use crate::combined::CombinedAllocator;
use crate::list::{FreeList, FreeNode};
use crate::platform;
use crate::primary::RegionAllocator;
use crate::size_class::{self, NUM_CLASSES};

/// Thread-owned cache of free chunks, one list per size class.
///
/// The all-zero byte pattern is the valid empty state, so a cache can live in
/// zero-initialized thread-local storage without running a constructor.
pub struct LocalCache {
    free_lists: [FreeList; NUM_CLASSES],
}

impl LocalCache {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        const EMPTY: FreeList = FreeList::new();
        LocalCache {
            free_lists: [EMPTY; NUM_CLASSES],
        }
    }

    /// Reset to the empty state. Optional for storage that is already zeroed.
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Number of chunks currently cached for `class_id`.
    #[inline]
    pub fn cached(&self, class_id: usize) -> usize {
        self.free_lists[class_id].len()
    }

    /// Pop a chunk of `class_id`, refilling from the primary if the local
    /// list is empty.
    ///
    /// # Safety
    /// `primary` must be initialized, `class_id < NUM_CLASSES`, and this
    /// cache must only ever be used with this `primary`.
    pub unsafe fn allocate(&mut self, primary: &RegionAllocator, class_id: usize) -> *mut u8 {
        debug_assert!(class_id < NUM_CLASSES);
        let list = &mut self.free_lists[class_id];
        if list.is_empty() {
            primary.bulk_allocate(class_id, list);
        }
        let Some(node) = list.pop_front() else {
            platform::abort_with_message("sidemalloc: bulk refill returned no chunks\n");
        };
        node as *mut u8
    }

    /// Push `p` onto the local list for `class_id`. When the list reaches
    /// twice its cap, the front half goes back to the primary.
    ///
    /// # Safety
    /// `p` must be a live chunk of `class_id` from `primary`, not already on
    /// any free list.
    pub unsafe fn deallocate(&mut self, primary: &RegionAllocator, class_id: usize, p: *mut u8) {
        debug_assert!(class_id < NUM_CLASSES);
        let list = &mut self.free_lists[class_id];
        list.push_front(p as *mut FreeNode);
        if list.len() >= 2 * size_class::max_cached(class_id) {
            self.drain_half(primary, class_id);
        }
    }

    /// Hand every cached chunk back to the primary. All lists are empty
    /// afterwards.
    ///
    /// # Safety
    /// `primary` must be the backend this cache was used with.
    pub unsafe fn drain(&mut self, primary: &RegionAllocator) {
        for class_id in 0..NUM_CLASSES {
            let list = &mut self.free_lists[class_id];
            if !list.is_empty() {
                primary.bulk_deallocate(class_id, list);
            }
            debug_assert!(list.is_empty());
        }
    }

    unsafe fn drain_half(&mut self, primary: &RegionAllocator, class_id: usize) {
        let list = &mut self.free_lists[class_id];
        let mut half = FreeList::new();
        let count = list.len() / 2;
        for _ in 0..count {
            let Some(node) = list.pop_front() else { break };
            half.push_front(node);
        }
        primary.bulk_deallocate(class_id, &mut half);
    }
}

struct TlsCache {
    cache: LocalCache,
    owner: *const CombinedAllocator,
}

impl Drop for TlsCache {
    fn drop(&mut self) {
        let owner = self.owner;
        if !owner.is_null() {
            unsafe { (*owner).swallow_cache(&mut self.cache) };
        }
    }
}

/// Run `f` with this thread's cache for `allocator`. The cache drains back to
/// the allocator's primary when the thread exits.
///
/// Returns None if thread-local storage is unavailable (thread teardown) or
/// the cache is already borrowed (reentrant call).
pub fn with_thread_cache<F, R>(allocator: &'static CombinedAllocator, f: F) -> Option<R>
where
    F: FnOnce(&mut LocalCache) -> R,
{
    use std::cell::RefCell;

    thread_local! {
        static CACHE: RefCell<TlsCache> = const {
            RefCell::new(TlsCache {
                cache: LocalCache::new(),
                owner: core::ptr::null(),
            })
        };
    }

    CACHE
        .try_with(|cell| {
            let mut tls = cell.try_borrow_mut().ok()?;
            let owner = allocator as *const CombinedAllocator;
            if tls.owner != owner {
                // A thread that switches allocators gives the old one its
                // chunks back first; mixing backends would corrupt both.
                let previous = tls.owner;
                if !previous.is_null() {
                    unsafe { (*previous).swallow_cache(&mut tls.cache) };
                }
                tls.owner = owner;
            }
            Some(f(&mut tls.cache))
        })
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cache_is_empty() {
        let cache = LocalCache::new();
        for class_id in 0..NUM_CLASSES {
            assert_eq!(cache.cached(class_id), 0);
        }
    }

    #[test]
    fn refill_then_lifo_reuse() {
        let mut primary = Box::new(RegionAllocator::new());
        unsafe { primary.init() };
        let mut cache = LocalCache::new();
        let class_id = size_class::class_id(64);
        unsafe {
            let p = cache.allocate(&primary, class_id);
            assert!(!p.is_null());
            // The refill batch minus the chunk we popped stays local
            assert_eq!(cache.cached(class_id), size_class::max_cached(class_id) - 1);
            cache.deallocate(&primary, class_id, p);
            let q = cache.allocate(&primary, class_id);
            assert_eq!(p, q, "freed chunk should be reused first");
            cache.deallocate(&primary, class_id, q);
        }
    }

    #[test]
    fn overflow_drains_half_to_primary() {
        let mut primary = Box::new(RegionAllocator::new());
        unsafe { primary.init() };
        let mut cache = LocalCache::new();
        // Use a mid-range class with a small cap so the test stays cheap
        let class_id = size_class::class_id(1 << 13);
        let cap = size_class::max_cached(class_id);
        let mut held = Vec::new();
        unsafe {
            for _ in 0..2 * cap {
                held.push(cache.allocate(&primary, class_id));
            }
            for p in held {
                cache.deallocate(&primary, class_id, p);
                assert!(
                    cache.cached(class_id) < 2 * cap,
                    "cache exceeded its hysteresis bound"
                );
            }
        }
    }

    #[test]
    fn drain_empties_every_list() {
        let mut primary = Box::new(RegionAllocator::new());
        unsafe { primary.init() };
        let mut cache = LocalCache::new();
        unsafe {
            for &sz in &[16usize, 100, 4096, 1 << 20] {
                let class_id = size_class::class_id(sz);
                let p = cache.allocate(&primary, class_id);
                cache.deallocate(&primary, class_id, p);
            }
            cache.drain(&primary);
        }
        for class_id in 0..NUM_CLASSES {
            assert_eq!(cache.cached(class_id), 0);
        }
    }
}
