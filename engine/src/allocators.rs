// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod crt_malloc;
mod paged_free_list;
mod paged_heap;

use core::ffi::c_void;

pub use crt_malloc::CrtMalloc;
pub use paged_free_list::{PagedFreeList, DEFAULT_PAGE_CAPACITY};
pub use paged_heap::PagedHeap;

/// The alignment of every pointer returned by [`Allocator::alloc`], enough
/// for any primitive type and for the allocators' own headers.
pub const ALLOC_ALIGN: usize = 16;

/// The memory allocation capability shared by [`CrtMalloc`], [`PagedFreeList`]
/// and [`PagedHeap`].
///
/// Anything in the engine that needs dynamic memory depends on this trait
/// instead of a concrete allocator, which allows layering: a [`PagedHeap`]
/// gets its pages from [`PagedFreeList`]s, which get their pages from
/// whatever backing allocator they were created with, usually [`CrtMalloc`]
/// at the bottom.
///
/// Running out of memory is reported with a null pointer, never a panic, and
/// never retried internally. The misuse cases (double-free, freeing a pointer
/// from another allocator, use-after-free) are documented per function as
/// safety requirements and not defended against at runtime, to keep the
/// allocators' overhead minimal.
pub trait Allocator {
    /// Allocates `size` bytes, returning a null pointer if the backing memory
    /// has run out. Non-null results are aligned to [`ALLOC_ALIGN`] bytes.
    fn alloc(&self, size: usize) -> *mut c_void;

    /// Resizes the allocation to `new_size` bytes, returning the new pointer,
    /// which only equals `ptr` if the allocation could be resized in place. A
    /// null `ptr` makes this equivalent to [`Allocator::alloc`]. On failure,
    /// returns null and leaves the original allocation intact, still owned by
    /// the caller.
    ///
    /// ### Safety
    ///
    /// `ptr` must be null or a live allocation from this allocator. If a
    /// non-null pointer is returned, `ptr` is no longer live (unless it's the
    /// returned pointer itself) and must not be accessed.
    unsafe fn realloc(&self, ptr: *mut c_void, new_size: usize) -> *mut c_void;

    /// Frees the allocation. Freeing a null pointer is a no-op.
    ///
    /// ### Safety
    ///
    /// `ptr` must be null or a live allocation from this allocator, and it is
    /// no longer live after this call: freeing it again or accessing the
    /// memory it points to is undefined behavior.
    unsafe fn free(&self, ptr: *mut c_void);

    /// Returns the usable size of the allocation in bytes, at least as large
    /// as the size it was allocated with. The same pointer always reports the
    /// same size until it's passed to [`Allocator::realloc`] or
    /// [`Allocator::free`], regardless of unrelated allocator traffic.
    ///
    /// ### Safety
    ///
    /// `ptr` must be a live allocation from this allocator.
    unsafe fn get_size(&self, ptr: *mut c_void) -> usize;
}

/// Bookkeeping stored right before the pointers returned by [`CrtMalloc`] and
/// [`PagedHeap`], so that their free/realloc/get_size can recover the
/// allocation's size from the pointer alone, without trusting caller-supplied
/// sizes.
#[repr(C, align(16))]
pub(crate) struct SizeHeader {
    pub size: usize,
}

/// Size of [`SizeHeader`] including its alignment padding. The padding keeps
/// the pointer following the header aligned to [`ALLOC_ALIGN`].
pub(crate) const HEADER_SIZE: usize = size_of::<SizeHeader>();

/// Returns the pointer to the [`SizeHeader`] of an allocation that was
/// returned by an allocator which prefixes its allocations with one.
///
/// ### Safety
///
/// `ptr` must be a live allocation from such an allocator, i.e. there must be
/// an initialized [`SizeHeader`] in the [`HEADER_SIZE`] bytes before it.
pub(crate) unsafe fn header_of(ptr: *mut c_void) -> *mut SizeHeader {
    // Safety: the header is within the same backing allocation as `ptr`, just
    // HEADER_SIZE bytes before it, per this function's safety requirement.
    unsafe { ptr.byte_sub(HEADER_SIZE) as *mut SizeHeader }
}
