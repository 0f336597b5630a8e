use core::sync::atomic::{AtomicUsize, Ordering};

/// log2 of the per-class region reservation. 26 gives 64 MiB per class;
/// with 256 classes that is 16 GiB of uncommitted virtual space.
const DEFAULT_REGION_LOG: usize = 26;
const MIN_REGION_LOG: usize = 24;
const MAX_REGION_LOG: usize = 30;

/// Cached config values (read once at init, never allocate).
static REGION_LOG: AtomicUsize = AtomicUsize::new(DEFAULT_REGION_LOG);

/// Read configuration from environment variables.
/// Must be called during init, before any allocations.
///
/// # Safety
/// Must be called from a single-threaded context (libc::getenv is not
/// thread-safe against a concurrent environment writer).
pub unsafe fn read_config() {
    if let Some(val) = getenv_usize(b"SIDEMALLOC_REGION_LOG\0") {
        REGION_LOG.store(
            val.clamp(MIN_REGION_LOG, MAX_REGION_LOG),
            Ordering::Relaxed,
        );
    }
}

pub fn region_log() -> usize {
    REGION_LOG.load(Ordering::Relaxed)
}

/// Parse an environment variable as a usize.
///
/// # Safety
/// Calls libc::getenv.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    let val = libc::getenv(key.as_ptr() as *const libc::c_char);
    if val.is_null() {
        return None;
    }

    // Parse manually (no std allocation)
    let mut result: usize = 0;
    let mut ptr = val as *const u8;
    loop {
        let byte = *ptr;
        if byte == 0 {
            break;
        }
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
        ptr = ptr.add(1);
    }
    Some(result)
}
