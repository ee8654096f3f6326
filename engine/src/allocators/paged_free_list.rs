use core::{cell::Cell, ffi::c_void, fmt::Debug, ptr::null_mut};

use super::{Allocator, ALLOC_ALIGN};

/// How many items fit in one page by default. Pages are requested from the
/// backing allocator rarely, so the capacity mostly trades per-page overhead
/// against how much memory an almost-empty list holds on to.
pub const DEFAULT_PAGE_CAPACITY: usize = 128;

/// Header at the start of every page, linking the pages together so that they
/// can be returned to the backing allocator when the list is dropped. The
/// alignment padding keeps the first slot of the page aligned to
/// [`ALLOC_ALIGN`].
#[repr(C, align(16))]
struct PageHeader {
    next: *mut PageHeader,
}

/// A fixed-item-size allocator: carves pages from a backing allocator into
/// equal-size slots, and recycles freed slots through a free list threaded
/// through the freed memory itself.
///
/// Since every item has the same size, freed slots can be handed out again
/// without any fitting logic, and the only bookkeeping is one pointer stored
/// in each free slot's first word. Pages are never partially freed: dropping
/// the list returns all of its pages to the backing allocator at once, which
/// invalidates any items still handed out.
pub struct PagedFreeList<'alc> {
    backing: &'alc dyn Allocator,
    /// The fixed size of every item handed out by this list. Zero until the
    /// first [`Allocator::alloc`] call establishes it.
    item_size: Cell<usize>,
    /// Head of the free list: null, or a pointer to a freed slot whose first
    /// word points to the next freed slot.
    free_item: Cell<*mut c_void>,
    /// Head of the page list.
    pages: Cell<*mut PageHeader>,
    /// Items per page.
    page_capacity: usize,
}

impl Debug for PagedFreeList<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PagedFreeList")
            .field("item_size", &self.item_size)
            .field("free_item", &self.free_item)
            .field("page_capacity", &self.page_capacity)
            .finish_non_exhaustive()
    }
}

impl<'alc> PagedFreeList<'alc> {
    /// Creates a free list which hands out `item_size`-byte allocations, with
    /// the default page capacity of [`DEFAULT_PAGE_CAPACITY`] items. An
    /// `item_size` of zero leaves the size to be established by the first
    /// [`Allocator::alloc`] call.
    ///
    /// No pages are allocated up front, the backing allocator is only used
    /// once allocations are made.
    pub fn new(backing: &'alc dyn Allocator, item_size: usize) -> PagedFreeList<'alc> {
        PagedFreeList::with_page_capacity(backing, item_size, DEFAULT_PAGE_CAPACITY)
    }

    /// [`PagedFreeList::new`] with a specific amount of items per page.
    pub fn with_page_capacity(
        backing: &'alc dyn Allocator,
        item_size: usize,
        page_capacity: usize,
    ) -> PagedFreeList<'alc> {
        assert!(page_capacity > 0, "pages must fit at least one item");
        PagedFreeList {
            backing,
            item_size: Cell::new(item_size),
            free_item: Cell::new(null_mut()),
            pages: Cell::new(null_mut()),
            page_capacity,
        }
    }

    /// The size of the items this list hands out, zero if it hasn't been
    /// established yet.
    pub fn item_size(&self) -> usize {
        self.item_size.get()
    }

    /// The amount of pages currently held from the backing allocator. Only
    /// grows when an allocation is made with no freed slot to reuse, so
    /// this is bounded by the high-water mark of simultaneously live items.
    pub fn page_count(&self) -> usize {
        let mut count = 0;
        let mut page = self.pages.get();
        while !page.is_null() {
            count += 1;
            // Safety: every pointer on the page list was written as a valid
            // PageHeader in alloc, and pages are only freed in drop.
            page = unsafe { (*page).next };
        }
        count
    }

    /// Bytes reserved per slot: at least the item size, rounded up so that
    /// every slot can store the free list link and starts at an
    /// [`ALLOC_ALIGN`]-aligned offset. None if the item size is so close to
    /// `usize::MAX` that the padding overflows, which no allocator could
    /// satisfy anyway.
    fn slot_size(&self) -> Option<usize> {
        self.item_size
            .get()
            .max(size_of::<*mut c_void>())
            .checked_next_multiple_of(ALLOC_ALIGN)
    }
}

impl Allocator for PagedFreeList<'_> {
    /// Allocates one item. `size` must equal the list's item size; on the
    /// first call on a list created with an item size of zero, `size`
    /// establishes it.
    fn alloc(&self, size: usize) -> *mut c_void {
        if self.item_size.get() == 0 {
            self.item_size.set(size);
        }
        debug_assert_eq!(
            self.item_size.get(),
            size,
            "all allocations from one PagedFreeList must have the same size",
        );

        let free_item = self.free_item.get();
        if !free_item.is_null() {
            // Safety: every pointer on the free list points to a slot of at
            // least slot_size() >= size_of::<*mut c_void>() bytes, and its
            // first word was written to point to the next free slot (in
            // `free` or in the page setup below).
            let next_free = unsafe { *(free_item as *mut *mut c_void) };
            self.free_item.set(next_free);
            return free_item;
        }

        // No freed slot to reuse, get a new page from the backing allocator.
        // An unsatisfiable size (slots or the whole page overflowing usize)
        // is reported as an allocation failure, never a panic.
        let Some(slot_size) = self.slot_size() else {
            return null_mut();
        };
        let Some(page_size) = slot_size
            .checked_mul(self.page_capacity)
            .and_then(|slots_size| slots_size.checked_add(size_of::<PageHeader>()))
        else {
            return null_mut();
        };
        let page = self.backing.alloc(page_size) as *mut PageHeader;
        if page.is_null() {
            return null_mut();
        }

        // Safety: the page is at least size_of::<PageHeader>() bytes, and the
        // Allocator contract aligns it to ALLOC_ALIGN, enough for PageHeader.
        unsafe { page.write(PageHeader { next: self.pages.get() }) };
        self.pages.set(page);

        // The first slot of the page becomes the allocation being made, and
        // the rest are threaded onto the free list, so the next
        // `page_capacity - 1` allocations won't need a new page.
        //
        // Safety (this and the byte_adds below): all of the offset pointers
        // are within the page, since the page was allocated with room for the
        // header and page_capacity slots.
        let first_slot = unsafe { (page as *mut c_void).byte_add(size_of::<PageHeader>()) };
        let mut next_free = null_mut();
        for slot_index in (1..self.page_capacity).rev() {
            let slot = unsafe { first_slot.byte_add(slot_index * slot_size) };
            // Safety: the slot is at least pointer-sized and ALLOC_ALIGN
            // aligned, so its first word can store the free list link.
            unsafe { *(slot as *mut *mut c_void) = next_free };
            next_free = slot;
        }
        self.free_item.set(next_free);

        first_slot
    }

    /// A fixed-size list can't change an allocation's size: this returns
    /// `ptr` as-is while `new_size` fits in the item size, and fails with a
    /// null pointer otherwise.
    unsafe fn realloc(&self, ptr: *mut c_void, new_size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        if new_size <= self.item_size.get() {
            ptr
        } else {
            null_mut()
        }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        // Safety: `ptr` is an allocation from this list per this function's
        // safety requirements, so it points to a slot of at least slot_size()
        // bytes, whose first word is free to use as the free list link now
        // that the item is no longer live.
        unsafe { *(ptr as *mut *mut c_void) = self.free_item.get() };
        self.free_item.set(ptr);
    }

    /// Always the fixed item size, regardless of `ptr` (constant-size
    /// allocator).
    unsafe fn get_size(&self, _ptr: *mut c_void) -> usize {
        self.item_size.get()
    }
}

impl Drop for PagedFreeList<'_> {
    fn drop(&mut self) {
        let mut page = self.pages.get();
        while !page.is_null() {
            // Safety: every pointer on the page list was written as a valid
            // PageHeader in alloc, and this loop is the only place where
            // pages are freed.
            let next = unsafe { (*page).next };
            // Safety: the page is a live allocation from self.backing, made
            // in alloc. Any items still handed out from this page are
            // invalidated here, which is documented in the type-level docs.
            unsafe { self.backing.free(page as *mut c_void) };
            page = next;
        }
    }
}
