use core::{ffi::c_void, ptr};

use platform::Pal;

use super::{header_of, Allocator, SizeHeader, HEADER_SIZE};

/// Thin adapter exposing the platform's allocator as an engine [`Allocator`].
///
/// [`Pal`] only provides a plain malloc/free pair, so each allocation is
/// prefixed with a [`SizeHeader`]: that's what makes [`Allocator::free`] and
/// [`Allocator::get_size`] implementable without any external bookkeeping.
/// Stateless apart from the platform borrow, so a single instance can back
/// any number of paged allocators.
#[derive(Clone, Copy)]
pub struct CrtMalloc<'plat> {
    platform: &'plat dyn Pal,
}

impl<'plat> CrtMalloc<'plat> {
    /// Creates a [`CrtMalloc`] which allocates with [`Pal::malloc`].
    pub fn new(platform: &'plat dyn Pal) -> CrtMalloc<'plat> {
        CrtMalloc { platform }
    }
}

impl Allocator for CrtMalloc<'_> {
    fn alloc(&self, size: usize) -> *mut c_void {
        let Some(total_size) = HEADER_SIZE.checked_add(size) else {
            return ptr::null_mut();
        };

        let base = self.platform.malloc(total_size);
        if base.is_null() {
            return ptr::null_mut();
        }

        // Safety: `base` points to at least HEADER_SIZE writable bytes, and
        // Pal::malloc results are aligned to 16 bytes, enough for SizeHeader.
        unsafe { (base as *mut SizeHeader).write(SizeHeader { size }) };

        // Safety: the allocation is HEADER_SIZE + size bytes, so the offset
        // pointer is still within (the end of the header of) the same
        // allocated object.
        unsafe { base.byte_add(HEADER_SIZE) }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, new_size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.alloc(new_size);
        }

        // Safety: `ptr` is a live allocation from this allocator, so it has a
        // header, initialized in alloc.
        let old_size = unsafe { (*header_of(ptr)).size };

        // Pal has no realloc, so this is always allocate-copy-free.
        let new_ptr = self.alloc(new_size);
        if new_ptr.is_null() {
            return core::ptr::null_mut();
        }

        // Safety: both pointers point to allocations at least
        // `min(old_size, new_size)` bytes long, and distinct allocations
        // can't overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                ptr as *const u8,
                new_ptr as *mut u8,
                old_size.min(new_size),
            );
        }

        // Safety: `ptr` is a live allocation from this allocator, and the
        // caller gives up on it by contract when a new pointer is returned.
        unsafe { self.free(ptr) };

        new_ptr
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }

        // Safety: `ptr` is a live allocation from this allocator, so it has a
        // header, initialized in alloc.
        let header = unsafe { header_of(ptr) };
        let size = unsafe { (*header).size };

        // Safety: `header` is the pointer originally returned by Pal::malloc,
        // allocated with HEADER_SIZE + size bytes, and per this function's
        // safety requirements nobody accesses the allocation after this.
        unsafe { self.platform.free(header as *mut c_void, HEADER_SIZE + size) };
    }

    unsafe fn get_size(&self, ptr: *mut c_void) -> usize {
        // Safety: `ptr` is a live allocation from this allocator, so it has a
        // header, initialized in alloc.
        unsafe { (*header_of(ptr)).size }
    }
}
