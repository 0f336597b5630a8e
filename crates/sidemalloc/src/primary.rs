//! Size-classed primary backend.
//!
//! One `MAP_NORESERVE` reservation is split into equal per-class regions, so
//! identity queries are pure address arithmetic: a pointer's class is its
//! offset into the reservation shifted by the region size. Chunks of
//! `class_to_size(c)` bytes are carved from the front of region `c` on
//! demand; freed chunks sit on a per-class intrusive list. A strip of
//! per-chunk metadata grows from the region's tail toward the front.
//!
//! Regions start on a `MAX_SIZE` boundary, which makes every chunk naturally
//! aligned: a power-of-two-sized chunk lands on a multiple of its size.
//!
//! Callers move chunks in bulk: a thread cache refills with one
//! `bulk_allocate` and returns surplus with one `bulk_deallocate`, so the
//! per-class mutex is taken once per batch rather than once per chunk.

use crate::config;
use crate::list::{FreeList, FreeNode};
use crate::platform;
use crate::size_class::{self, NUM_CLASSES};
use crate::sync::Mutex;
use crate::util::align_up;

/// Scratch metadata bytes reserved per chunk at the tail of its region.
/// Analysis runtimes keep per-object bookkeeping here.
pub const METADATA_SIZE: usize = 32;

struct RegionState {
    free_list: FreeList,
    /// Bytes carved into chunks from the region front. Monotone.
    carved: usize,
}

pub struct RegionAllocator {
    map_beg: usize,
    map_size: usize,
    /// First region start; aligned to `MAX_SIZE` within the mapping.
    space_beg: usize,
    region_log: usize,
    regions: [Mutex<RegionState>; NUM_CLASSES],
}

unsafe impl Send for RegionAllocator {}
unsafe impl Sync for RegionAllocator {}

impl RegionAllocator {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        const REGION: Mutex<RegionState> = Mutex::new(RegionState {
            free_list: FreeList::new(),
            carved: 0,
        });
        RegionAllocator {
            map_beg: 0,
            map_size: 0,
            space_beg: 0,
            region_log: 0,
            regions: [REGION; NUM_CLASSES],
        }
    }

    /// Reserve the class regions. Aborts if the kernel refuses the
    /// reservation.
    ///
    /// # Safety
    /// Must be called exactly once, before any other method, from a single
    /// thread.
    pub unsafe fn init(&mut self) {
        debug_assert!(self.space_beg == 0);
        let region_log = config::region_log();
        let total = NUM_CLASSES << region_log;
        // Alignment slack so every region starts on a MAX_SIZE boundary.
        let map_size = total + size_class::MAX_SIZE;
        let map_beg = platform::map_noreserve_or_die(map_size, "size-class regions") as usize;
        self.map_beg = map_beg;
        self.map_size = map_size;
        self.space_beg = align_up(map_beg, size_class::MAX_SIZE);
        self.region_log = region_log;
    }

    /// Whether a request of `size` bytes at `alignment` can be served by a
    /// size-classed chunk. The caller has already rounded `size` up to a
    /// multiple of `alignment` when `alignment > 8`.
    #[inline]
    pub fn can_allocate(&self, size: usize, alignment: usize) -> bool {
        size <= size_class::MAX_SIZE && alignment <= size_class::MAX_SIZE
    }

    #[inline]
    pub fn class_id(&self, size: usize) -> usize {
        size_class::class_id(size)
    }

    #[inline]
    pub fn pointer_is_mine(&self, p: *const u8) -> bool {
        let a = p as usize;
        a >= self.space_beg && a < self.space_beg + (NUM_CLASSES << self.region_log)
    }

    /// Class of a chunk previously handed out by this allocator.
    #[inline]
    pub fn get_size_class(&self, p: *const u8) -> usize {
        debug_assert!(self.pointer_is_mine(p));
        (p as usize - self.space_beg) >> self.region_log
    }

    #[inline]
    fn region_beg(&self, class_id: usize) -> usize {
        self.space_beg + (class_id << self.region_log)
    }

    /// Move a batch of free chunks of `class_id` onto `out`.
    /// `out` is guaranteed non-empty on return.
    ///
    /// # Safety
    /// The allocator must be initialized and `class_id < NUM_CLASSES`.
    /// Chunks pushed onto `out` are loaned to the caller until returned via
    /// `bulk_deallocate`.
    pub unsafe fn bulk_allocate(&self, class_id: usize, out: &mut FreeList) {
        debug_assert!(class_id < NUM_CLASSES);
        let batch = size_class::max_cached(class_id).max(1);
        let mut region = self.regions[class_id].lock();
        if region.free_list.is_empty() {
            self.carve(class_id, &mut region, batch);
        }
        let mut moved = 0;
        while moved < batch {
            match region.free_list.pop_front() {
                Some(node) => {
                    out.push_front(node);
                    moved += 1;
                }
                None => break,
            }
        }
        debug_assert!(moved > 0);
    }

    /// Return every chunk on `in_list` to the class free list.
    /// `in_list` is empty on return.
    ///
    /// # Safety
    /// All nodes must be chunks of `class_id` previously produced by
    /// `bulk_allocate` on this instance.
    pub unsafe fn bulk_deallocate(&self, class_id: usize, in_list: &mut FreeList) {
        debug_assert!(class_id < NUM_CLASSES);
        let mut region = self.regions[class_id].lock();
        region.free_list.append_front(in_list);
    }

    /// Carve up to `batch` fresh chunks from the region front.
    /// Called under the region lock. Aborts if the region is exhausted.
    unsafe fn carve(&self, class_id: usize, region: &mut RegionState, batch: usize) {
        let size = size_class::class_to_size(class_id);
        let region_size = 1usize << self.region_log;
        let beg = self.region_beg(class_id);
        // The chunk grid and the metadata strip grow toward each other;
        // capacity keeps them from meeting.
        let capacity = region_size / (size + METADATA_SIZE);
        let user_limit = capacity * size;
        let mut carved = 0;
        while carved < batch && region.carved + size <= user_limit {
            let chunk = (beg + region.carved) as *mut FreeNode;
            region.free_list.push_front(chunk);
            region.carved += size;
            carved += 1;
        }
        if carved == 0 {
            platform::abort_with_message("sidemalloc: size-class region exhausted\n");
        }
    }

    /// First byte of a chunk, given any pointer into it.
    pub fn get_block_begin(&self, p: *const u8) -> *mut u8 {
        let class_id = self.get_size_class(p);
        let size = size_class::class_to_size(class_id);
        let beg = self.region_beg(class_id);
        let offset = (p as usize - beg) / size * size;
        (beg + offset) as *mut u8
    }

    /// Physical chunk size backing `p`.
    pub fn get_actually_allocated_size(&self, p: *const u8) -> usize {
        size_class::class_to_size(self.get_size_class(p))
    }

    /// Per-chunk scratch metadata slot, `METADATA_SIZE` bytes.
    pub fn get_meta_data(&self, p: *const u8) -> *mut u8 {
        let class_id = self.get_size_class(p);
        let size = size_class::class_to_size(class_id);
        let beg = self.region_beg(class_id);
        let index = (p as usize - beg) / size;
        let region_end = beg + (1usize << self.region_log);
        (region_end - (index + 1) * METADATA_SIZE) as *mut u8
    }

    /// Bytes carved out of the regions so far. Monotone: chunks returned by
    /// callers go on free lists, not back to the OS.
    pub fn total_memory_used(&self) -> usize {
        let mut total = 0;
        for region in &self.regions {
            total += region.lock().carved;
        }
        total
    }

    /// Release the whole reservation. The allocator is unusable afterwards.
    ///
    /// # Safety
    /// No chunk from this allocator may be referenced again, including chunks
    /// still sitting in thread caches.
    pub unsafe fn test_only_unmap(&mut self) {
        platform::unmap(self.map_beg as *mut u8, self.map_size);
        self.map_beg = 0;
        self.map_size = 0;
        self.space_beg = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::is_aligned;

    fn fresh() -> Box<RegionAllocator> {
        let mut a = Box::new(RegionAllocator::new());
        unsafe { a.init() };
        a
    }

    #[test]
    fn bulk_allocate_returns_chunks_of_the_class() {
        let a = fresh();
        let class_id = size_class::class_id(48);
        let size = size_class::class_to_size(class_id);
        let mut list = FreeList::new();
        unsafe { a.bulk_allocate(class_id, &mut list) };
        assert!(!list.is_empty());
        while let Some(node) = list.pop_front() {
            let p = node as *const u8;
            assert!(a.pointer_is_mine(p));
            assert_eq!(a.get_size_class(p), class_id);
            assert_eq!(a.get_actually_allocated_size(p), size);
            assert_eq!(a.get_block_begin(p), p as *mut u8);
        }
    }

    #[test]
    fn chunks_are_naturally_aligned() {
        let a = fresh();
        for &req in &[16usize, 64, 1024, 4096, 1 << 17, 1 << 21] {
            let class_id = size_class::class_id(req);
            let mut list = FreeList::new();
            unsafe { a.bulk_allocate(class_id, &mut list) };
            while let Some(node) = list.pop_front() {
                assert!(
                    is_aligned(node as usize, req),
                    "chunk {:p} not aligned to {}",
                    node,
                    req
                );
            }
        }
    }

    #[test]
    fn block_begin_covers_interior_pointers() {
        let a = fresh();
        let class_id = size_class::class_id(100);
        let size = size_class::class_to_size(class_id);
        let mut list = FreeList::new();
        unsafe { a.bulk_allocate(class_id, &mut list) };
        let p = list.pop_front().unwrap() as *const u8;
        for off in [0, 1, size / 2, size - 1] {
            let q = unsafe { p.add(off) };
            assert_eq!(a.get_block_begin(q), p as *mut u8);
        }
        unsafe {
            list.push_front(p as *mut FreeNode);
            a.bulk_deallocate(class_id, &mut list);
        }
    }

    #[test]
    fn metadata_slots_are_disjoint_and_writable() {
        let a = fresh();
        let class_id = size_class::class_id(32);
        let mut list = FreeList::new();
        unsafe { a.bulk_allocate(class_id, &mut list) };
        let mut metas = Vec::new();
        let mut chunks = Vec::new();
        while let Some(node) = list.pop_front() {
            let m = a.get_meta_data(node as *const u8);
            unsafe { core::ptr::write_bytes(m, 0x5A, METADATA_SIZE) };
            metas.push(m as usize);
            chunks.push(node);
        }
        metas.sort_unstable();
        for w in metas.windows(2) {
            assert!(w[1] - w[0] >= METADATA_SIZE, "metadata slots overlap");
        }
        unsafe {
            for node in chunks {
                list.push_front(node);
            }
            a.bulk_deallocate(class_id, &mut list);
        }
    }

    #[test]
    fn total_memory_used_grows_with_carving() {
        let a = fresh();
        assert_eq!(a.total_memory_used(), 0);
        let class_id = size_class::class_id(256);
        let mut list = FreeList::new();
        unsafe { a.bulk_allocate(class_id, &mut list) };
        let used = a.total_memory_used();
        assert!(used >= size_class::class_to_size(class_id));
        // Returning chunks does not shrink the carve counter
        unsafe { a.bulk_deallocate(class_id, &mut list) };
        assert_eq!(a.total_memory_used(), used);
    }
}
