//! Large-object allocator: one anonymous mapping per allocation.
//!
//! Covers the sizes and alignments the size-classed primary cannot. Each
//! allocation maps its own region; the first page holds a bookkeeping header
//! and the user pointer starts exactly one page after the mapping (advanced
//! to the requested alignment when that exceeds a page). Live headers form a
//! doubly-linked list under a spin mutex. Identity queries walk the list,
//! which is fine because large allocations are rare.
//!
//! Mapping happens before the lock is taken and unmapping after it is
//! released, so the critical section is only the O(1) list splice.

use crate::platform;
use crate::sync::Mutex;
use crate::util::{align_up, is_aligned};
use core::ptr;

/// Bookkeeping header stored in the page preceding the user region. The rest
/// of that page -- everything after these fields -- is scratch metadata for
/// the runtime, at least half a page of it.
#[repr(C)]
struct Header {
    map_beg: usize,
    map_size: usize,
    user_size: usize,
    next: *mut Header,
    prev: *mut Header,
}

// The scratch guarantee assumes the fixed fields fit in half of the smallest
// supported page.
const _: () = assert!(core::mem::size_of::<Header>() <= 2048);

struct LiveList {
    head: *mut Header,
}

pub struct LargeMapAllocator {
    page_size: usize,
    list: Mutex<LiveList>,
}

unsafe impl Send for LargeMapAllocator {}
unsafe impl Sync for LargeMapAllocator {}

impl LargeMapAllocator {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        LargeMapAllocator {
            page_size: 0,
            list: Mutex::new(LiveList {
                head: ptr::null_mut(),
            }),
        }
    }

    /// Cache the page size. Must be called once before any other method.
    ///
    /// # Safety
    /// Single-threaded init.
    pub unsafe fn init(&mut self) {
        self.page_size = crate::util::page_size();
    }

    /// Map a fresh region for `size` bytes at `alignment`. Returns null only
    /// on arithmetic overflow of the mapping size; a refused mapping aborts
    /// inside the OS wrapper.
    ///
    /// # Safety
    /// The allocator must be initialized and `alignment` a power of two.
    pub unsafe fn allocate(&self, size: usize, alignment: usize) -> *mut u8 {
        debug_assert!(alignment.is_power_of_two());
        let page = self.page_size;
        debug_assert!(page != 0);

        let Some(rounded) = size.checked_add(page - 1) else {
            return ptr::null_mut();
        };
        let rounded = rounded & !(page - 1);
        let Some(mut map_size) = rounded.checked_add(page) else {
            return ptr::null_mut();
        };
        if alignment > page {
            // Slack so the user pointer can be advanced to the alignment
            map_size = match map_size.checked_add(alignment) {
                Some(v) => v,
                None => return ptr::null_mut(),
            };
        }

        let map_beg = platform::map_or_die(map_size, "large allocation") as usize;
        let map_end = map_beg + map_size;
        let mut res = map_beg + page;
        if !is_aligned(res, alignment) {
            res = align_up(res, alignment);
        }
        debug_assert!(is_aligned(res, alignment));
        debug_assert!(res + size <= map_end);

        // The header always sits exactly one page before the user pointer,
        // even when alignment slack moved the user pointer forward.
        let h = (res - page) as *mut Header;
        (*h).map_beg = map_beg;
        (*h).map_size = map_size;
        (*h).user_size = size;
        {
            let mut list = self.list.lock();
            (*h).next = list.head;
            (*h).prev = ptr::null_mut();
            if !list.head.is_null() {
                (*list.head).prev = h;
            }
            list.head = h;
        }
        res as *mut u8
    }

    /// Unlink and unmap the allocation at `p`, header page included.
    ///
    /// # Safety
    /// `p` must have been returned by `allocate` on this instance and not
    /// yet deallocated.
    pub unsafe fn deallocate(&self, p: *mut u8) {
        let h = self.header(p);
        let map_beg;
        let map_size;
        {
            let mut list = self.list.lock();
            let prev = (*h).prev;
            let next = (*h).next;
            if !prev.is_null() {
                (*prev).next = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
            if list.head == h {
                list.head = next;
            }
            map_beg = (*h).map_beg;
            map_size = (*h).map_size;
        }
        platform::unmap(map_beg as *mut u8, map_size);
    }

    /// Whether `p` is the user pointer of a live allocation.
    ///
    /// # Safety
    /// The allocator must be initialized. `p` may be any address.
    pub unsafe fn pointer_is_mine(&self, p: *const u8) -> bool {
        // User pointers are always page-aligned
        if !is_aligned(p as usize, self.page_size) {
            return false;
        }
        let list = self.list.lock();
        let mut h = list.head;
        while !h.is_null() {
            if self.user(h) == p as usize {
                return true;
            }
            h = (*h).next;
        }
        false
    }

    /// User address of the live allocation containing `p`, or null.
    ///
    /// # Safety
    /// The allocator must be initialized. `p` may be any address.
    pub unsafe fn get_block_begin(&self, p: *const u8) -> *mut u8 {
        let list = self.list.lock();
        let mut h = list.head;
        while !h.is_null() {
            let user = self.user(h);
            if (p as usize) >= user && (p as usize) < user + (*h).user_size {
                return user as *mut u8;
            }
            h = (*h).next;
        }
        ptr::null_mut()
    }

    /// Usable span of the user region: the requested size rounded up to a
    /// page. Excludes the header page and any alignment slack.
    ///
    /// # Safety
    /// `p` must be a live user pointer from this instance.
    pub unsafe fn get_actually_allocated_size(&self, p: *const u8) -> usize {
        align_up((*self.header(p)).user_size, self.page_size)
    }

    /// Scratch metadata for the allocation at `p`: the header page past the
    /// fixed fields, at least half a page.
    ///
    /// # Safety
    /// `p` must be a live user pointer from this instance.
    pub unsafe fn get_meta_data(&self, p: *const u8) -> *mut u8 {
        self.header(p).add(1) as *mut u8
    }

    /// Sum of page-rounded user sizes across live allocations.
    ///
    /// # Safety
    /// The allocator must be initialized.
    pub unsafe fn total_memory_used(&self) -> usize {
        let list = self.list.lock();
        let mut total = 0;
        let mut h = list.head;
        while !h.is_null() {
            total += align_up((*h).user_size, self.page_size);
            h = (*h).next;
        }
        total
    }

    /// Number of live allocations. Walks the list; diagnostic use only.
    ///
    /// # Safety
    /// The allocator must be initialized.
    pub unsafe fn live_allocations(&self) -> usize {
        let list = self.list.lock();
        let mut n = 0;
        let mut h = list.head;
        while !h.is_null() {
            debug_assert!((*h).prev.is_null() || (*(*h).prev).next == h);
            debug_assert!((*h).next.is_null() || (*(*h).next).prev == h);
            n += 1;
            h = (*h).next;
        }
        n
    }

    #[inline]
    unsafe fn header(&self, p: *const u8) -> *mut Header {
        debug_assert!(is_aligned(p as usize, self.page_size));
        (p as usize - self.page_size) as *mut Header
    }

    #[inline]
    unsafe fn user(&self, h: *mut Header) -> usize {
        h as usize + self.page_size
    }
}
