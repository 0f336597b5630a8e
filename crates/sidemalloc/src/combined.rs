//! Dispatch façade over the size-classed primary and the large-map secondary.
//!
//! Requests the primary accepts flow through the caller's thread cache;
//! everything else (oversized or over-aligned) goes to the secondary.
//! Deallocation and the identity queries route on primary pointer ownership,
//! which is a pure range check.

use crate::cache::LocalCache;
use crate::large::LargeMapAllocator;
use crate::primary::RegionAllocator;
use crate::util::{align_up, is_aligned};
use core::ptr;

pub struct CombinedAllocator {
    primary: RegionAllocator,
    secondary: LargeMapAllocator,
}

impl CombinedAllocator {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        CombinedAllocator {
            primary: RegionAllocator::new(),
            secondary: LargeMapAllocator::new(),
        }
    }

    /// Initialize both backends.
    ///
    /// # Safety
    /// Must be called exactly once, before any other method, from a single
    /// thread.
    pub unsafe fn init(&mut self) {
        crate::config::read_config();
        self.primary.init();
        self.secondary.init();
    }

    /// Allocate `size` bytes at `alignment` through `cache`. Zero-sized
    /// requests are served as one byte. Returns null only on arithmetic
    /// overflow; every other failure aborts.
    ///
    /// # Safety
    /// The allocator must be initialized, `alignment` a power of two, and
    /// `cache` owned by the calling thread and used only with this
    /// allocator.
    pub unsafe fn allocate(
        &self,
        cache: &mut LocalCache,
        size: usize,
        alignment: usize,
        cleared: bool,
    ) -> *mut u8 {
        // Returning null on a zero-sized request would break callers that
        // treat null as out-of-memory
        let mut size = if size == 0 { 1 } else { size };
        if size.checked_add(alignment).is_none() {
            return ptr::null_mut();
        }
        if alignment > 8 {
            size = align_up(size, alignment);
        }
        let res = if self.primary.can_allocate(size, alignment) {
            cache.allocate(&self.primary, self.primary.class_id(size))
        } else {
            self.secondary.allocate(size, alignment)
        };
        if alignment > 8 {
            debug_assert!(is_aligned(res as usize, alignment));
        }
        if cleared && !res.is_null() {
            ptr::write_bytes(res, 0, size);
        }
        res
    }

    /// Free `p`. Null is a no-op.
    ///
    /// # Safety
    /// `p` must be null or a live pointer from `allocate` on this allocator;
    /// `cache` as in `allocate`.
    pub unsafe fn deallocate(&self, cache: &mut LocalCache, p: *mut u8) {
        if p.is_null() {
            return;
        }
        if self.primary.pointer_is_mine(p) {
            cache.deallocate(&self.primary, self.primary.get_size_class(p), p);
        } else {
            self.secondary.deallocate(p);
        }
    }

    /// Resize the allocation at `p` to `new_size`, moving it. The prefix up
    /// to the smaller of the old usable size and `new_size` is preserved
    /// byte-for-byte. Null `p` allocates; zero `new_size` frees and returns
    /// null.
    ///
    /// # Safety
    /// As for `allocate` and `deallocate`.
    pub unsafe fn reallocate(
        &self,
        cache: &mut LocalCache,
        p: *mut u8,
        new_size: usize,
        alignment: usize,
    ) -> *mut u8 {
        if p.is_null() {
            return self.allocate(cache, new_size, alignment, false);
        }
        if new_size == 0 {
            self.deallocate(cache, p);
            return ptr::null_mut();
        }
        debug_assert!(self.pointer_is_mine(p));
        let old_size = self.get_actually_allocated_size(p);
        let copy_size = new_size.min(old_size);
        let new_p = self.allocate(cache, new_size, alignment, false);
        if !new_p.is_null() {
            // Always distinct regions; the old one is still live here
            ptr::copy_nonoverlapping(p, new_p, copy_size);
        }
        self.deallocate(cache, p);
        new_p
    }

    /// Whether `p` came from this allocator.
    ///
    /// # Safety
    /// The allocator must be initialized. `p` may be any address.
    pub unsafe fn pointer_is_mine(&self, p: *const u8) -> bool {
        if self.primary.pointer_is_mine(p) {
            return true;
        }
        self.secondary.pointer_is_mine(p)
    }

    /// Scratch metadata slot for the allocation at `p`.
    ///
    /// # Safety
    /// `p` must be a live pointer from this allocator.
    pub unsafe fn get_meta_data(&self, p: *const u8) -> *mut u8 {
        if self.primary.pointer_is_mine(p) {
            return self.primary.get_meta_data(p);
        }
        self.secondary.get_meta_data(p)
    }

    /// First byte of the allocation containing `p`, or null.
    ///
    /// # Safety
    /// The allocator must be initialized. `p` may be any address inside a
    /// live allocation.
    pub unsafe fn get_block_begin(&self, p: *const u8) -> *mut u8 {
        if self.primary.pointer_is_mine(p) {
            return self.primary.get_block_begin(p);
        }
        self.secondary.get_block_begin(p)
    }

    /// Physical bytes backing the allocation at `p`.
    ///
    /// # Safety
    /// `p` must be a live pointer from this allocator.
    pub unsafe fn get_actually_allocated_size(&self, p: *const u8) -> usize {
        if self.primary.pointer_is_mine(p) {
            return self.primary.get_actually_allocated_size(p);
        }
        self.secondary.get_actually_allocated_size(p)
    }

    /// Bytes in use across both backends.
    ///
    /// # Safety
    /// The allocator must be initialized.
    pub unsafe fn total_memory_used(&self) -> usize {
        self.primary.total_memory_used() + self.secondary.total_memory_used()
    }

    /// Drain `cache` into the primary. Call when a thread exits or under
    /// memory pressure.
    ///
    /// # Safety
    /// `cache` must have been used only with this allocator.
    pub unsafe fn swallow_cache(&self, cache: &mut LocalCache) {
        cache.drain(&self.primary);
    }

    /// Release the primary's reservation. The allocator is unusable
    /// afterwards.
    ///
    /// # Safety
    /// No pointer from this allocator may be referenced again.
    pub unsafe fn test_only_unmap(&mut self) {
        self.primary.test_only_unmap();
    }
}
