#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

/// Abort with a diagnostic message to stderr.
/// Used for mapping failures and contract violations; never allocates.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

#[cold]
#[inline(never)]
fn die_on_map_failure(what: &str) -> ! {
    unsafe {
        let prefix = "sidemalloc: failed to map memory for ";
        libc::write(2, prefix.as_ptr() as *const libc::c_void, prefix.len());
        libc::write(2, what.as_ptr() as *const libc::c_void, what.len());
        libc::write(2, b"\n".as_ptr() as *const libc::c_void, 1);
        libc::abort();
    }
}

/// Map anonymous read-write memory. Returns null on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    sys::map_anonymous(size)
}

/// Map anonymous read-write memory, aborting the process with a diagnostic
/// naming `what` if the kernel refuses.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
pub unsafe fn map_or_die(size: usize, what: &str) -> *mut u8 {
    let p = sys::map_anonymous(size);
    if p.is_null() {
        die_on_map_failure(what);
    }
    p
}

/// Reserve a large span of anonymous memory without committing backing store.
/// Untouched pages cost nothing. Aborts on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
pub unsafe fn map_noreserve_or_die(size: usize, what: &str) -> *mut u8 {
    let p = sys::map_noreserve(size);
    if p.is_null() {
        die_on_map_failure(what);
    }
    p
}

/// Unmap previously mapped memory.
///
/// # Safety
/// `ptr` must have been returned by one of the mapping functions above and
/// `size` must match.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Query the OS page size. Prefer `util::page_size()`, which caches.
pub fn os_page_size() -> usize {
    sys::os_page_size()
}
