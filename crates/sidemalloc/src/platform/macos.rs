use core::ptr;

/// Map anonymous read-write memory.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    let result = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if result == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        result as *mut u8
    }
}

/// Reserve anonymous memory. Darwin commits lazily, so a plain anonymous
/// mapping already behaves like a reservation.
///
/// # Safety
/// `size` must be page-aligned and non-zero.
pub unsafe fn map_noreserve(size: usize) -> *mut u8 {
    map_anonymous(size)
}

/// Unmap memory.
///
/// # Safety
/// `ptr` must have been returned by a mapping function with the same `size`.
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    libc::munmap(ptr as *mut libc::c_void, size);
}

/// Get the OS page size.
pub fn os_page_size() -> usize {
    unsafe {
        let n = libc::sysconf(libc::_SC_PAGESIZE);
        if n < 1 {
            4096
        } else {
            n as usize
        }
    }
}
