#![no_main]

use libfuzzer_sys::fuzz_target;
use sidemalloc::{CombinedAllocator, LocalCache};
use std::sync::OnceLock;

// Fuzz target that exercises size and alignment boundaries.
// Interprets input as a series of (size, alignment_shift) pairs, allocates,
// writes to the full usable extent, verifies alignment and identity queries,
// and frees.

fn allocator() -> &'static CombinedAllocator {
    static ALLOC: OnceLock<&'static CombinedAllocator> = OnceLock::new();
    ALLOC.get_or_init(|| {
        let a = Box::leak(Box::new(CombinedAllocator::new()));
        unsafe { a.init() };
        a
    })
}

fuzz_target!(|data: &[u8]| {
    let a = allocator();
    let mut cache = LocalCache::new();

    let mut i = 0;
    while i + 5 <= data.len() {
        let raw_size = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        // Alignments from 8 up to 64 KiB
        let alignment = 8usize << (data[i + 4] as usize % 14);
        i += 5;

        // Cap size to keep each iteration cheap
        let size = (raw_size as usize) % (8 * 1024 * 1024);

        let ptr = unsafe { a.allocate(&mut cache, size, alignment, false) };
        assert!(!ptr.is_null(), "allocate({}, {}) failed", size, alignment);

        assert_eq!(
            (ptr as usize) % alignment,
            0,
            "allocate({}, {}) returned unaligned pointer {:p}",
            size,
            alignment,
            ptr
        );

        unsafe {
            assert!(a.pointer_is_mine(ptr));
            assert_eq!(a.get_block_begin(ptr), ptr);

            let usable = a.get_actually_allocated_size(ptr);
            assert!(
                usable >= size.max(1),
                "usable size {} < requested {}",
                usable,
                size
            );

            // Write to full usable extent -- this should not crash
            std::ptr::write_bytes(ptr, 0xBB, usable);
            for j in (0..usable).step_by(509) {
                assert_eq!(*ptr.add(j), 0xBB);
            }

            a.deallocate(&mut cache, ptr);
        }
    }

    unsafe { a.swallow_cache(&mut cache) };
});
