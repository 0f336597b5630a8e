#![no_main]

use libfuzzer_sys::fuzz_target;
use sidemalloc::{CombinedAllocator, LocalCache};
use std::sync::OnceLock;

/// Fuzz target that interprets a byte slice as a sequence of allocator
/// operations.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=allocate, 1=deallocate, 2=reallocate, 3=allocate cleared)
///   byte 1-2: base size (little-endian u16)
///   byte 3: low nibble = slot index, high nibble & 7 = size shift
///
/// The size shift pushes some requests past the largest size class so both
/// backends get exercised. We track up to 16 live pointers.
const MAX_SLOTS: usize = 16;

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
    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];
    let mut sizes: [usize; MAX_SLOTS] = [0; MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let base = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] & 0x0F) as usize % MAX_SLOTS;
        let shift = (data[i + 3] >> 4) as usize & 0x07;
        let size = base << shift;
        i += 4;

        match opcode {
            0 | 3 => {
                if !slots[slot].is_null() {
                    unsafe { a.deallocate(&mut cache, slots[slot]) };
                }
                let cleared = opcode == 3;
                let p = unsafe { a.allocate(&mut cache, size, 8, cleared) };
                assert!(!p.is_null(), "allocate({}) failed", size);
                unsafe {
                    assert!(a.pointer_is_mine(p));
                    assert!(a.get_actually_allocated_size(p) >= size.max(1));
                    if cleared {
                        for j in 0..size.min(256) {
                            assert_eq!(*p.add(j), 0, "cleared byte {} dirty", j);
                        }
                    }
                    std::ptr::write_bytes(p, 0xAA, size.min(256));
                }
                slots[slot] = p;
                sizes[slot] = size;
            }
            1 => {
                if !slots[slot].is_null() {
                    unsafe { a.deallocate(&mut cache, slots[slot]) };
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                }
            }
            2 => {
                let had_pattern = !slots[slot].is_null();
                let preserved = sizes[slot].min(size).min(256);
                let p = unsafe { a.reallocate(&mut cache, slots[slot], size, 8) };
                if p.is_null() {
                    // Freed (new_size == 0) or overflow; either way the slot
                    // no longer owns anything
                    assert_eq!(size, 0, "reallocate({}) failed", size);
                    slots[slot] = std::ptr::null_mut();
                    sizes[slot] = 0;
                } else {
                    unsafe {
                        if had_pattern && size > 0 {
                            // The preserved prefix keeps the pattern
                            for j in 0..preserved {
                                assert_eq!(*p.add(j), 0xAA, "reallocate lost byte {}", j);
                            }
                        }
                        std::ptr::write_bytes(p, 0xAA, size.max(1).min(256));
                    }
                    slots[slot] = p;
                    sizes[slot] = size.max(1);
                }
            }
            _ => unreachable!(),
        }
    }

    // Cleanup
    for slot in &mut slots {
        if !slot.is_null() {
            unsafe { a.deallocate(&mut cache, *slot) };
            *slot = std::ptr::null_mut();
        }
    }
    unsafe { a.swallow_cache(&mut cache) };
});
