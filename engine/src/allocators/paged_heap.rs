use core::{
    ffi::c_void,
    fmt::Debug,
    ptr::{copy_nonoverlapping, null_mut},
};

use arrayvec::ArrayVec;

use super::{header_of, Allocator, PagedFreeList, SizeHeader, HEADER_SIZE};

/// The granularities small allocations are rounded up to. Each size class has
/// a dedicated [`PagedFreeList`]; allocations bigger than the largest class
/// go straight to the backing allocator. Must be strictly increasing.
const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];

/// A general-purpose allocator composed of one [`PagedFreeList`] per size
/// class, with a direct backing-allocator fallback for oversized requests.
///
/// Optimized for the engine's allocation patterns: lots of transient
/// same-size objects (job records, per-frame scratch data), which all end up
/// recycling slots within their size class instead of hitting the backing
/// allocator. Every allocation is prefixed with a [`SizeHeader`] recording
/// the requested size, which is how [`Allocator::free`] and
/// [`Allocator::realloc`] find the owning size class without any external
/// bookkeeping.
///
/// Dropping the heap returns all of the size classes' pages to the backing
/// allocator. Oversized allocations are not tracked as pages, so they must be
/// freed before the heap is dropped, or their memory is leaked.
pub struct PagedHeap<'alc> {
    backing: &'alc dyn Allocator,
    classes: ArrayVec<PagedFreeList<'alc>, { SIZE_CLASSES.len() }>,
}

impl Debug for PagedHeap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PagedHeap")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

impl<'alc> PagedHeap<'alc> {
    /// Creates a heap which gets its pages (and oversized allocations) from
    /// `backing`. No memory is allocated up front.
    pub fn new(backing: &'alc dyn Allocator) -> PagedHeap<'alc> {
        let mut classes = ArrayVec::new();
        for class_size in SIZE_CLASSES {
            // The free list items are "header + class size" bytes so that the
            // size tag sits right before the pointer handed out, with the
            // same layout as the oversized direct path.
            classes.push(PagedFreeList::new(backing, HEADER_SIZE + class_size));
        }
        PagedHeap { backing, classes }
    }

    /// The total amount of pages the size classes currently hold.
    pub fn page_count(&self) -> usize {
        self.classes.iter().map(|class| class.page_count()).sum()
    }

    /// The index of the size class that `size`-byte allocations share, None
    /// if `size` is beyond the largest class.
    fn class_index(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&class_size| size <= class_size)
    }
}

impl Allocator for PagedHeap<'_> {
    fn alloc(&self, size: usize) -> *mut c_void {
        let base = match Self::class_index(size) {
            Some(class) => {
                let list = &self.classes[class];
                list.alloc(list.item_size())
            }
            None => {
                let Some(total_size) = HEADER_SIZE.checked_add(size) else {
                    return null_mut();
                };
                self.backing.alloc(total_size)
            }
        };
        if base.is_null() {
            return null_mut();
        }

        // Safety: both paths above allocate at least HEADER_SIZE bytes,
        // aligned to ALLOC_ALIGN per the Allocator contract, enough for
        // SizeHeader.
        unsafe { (base as *mut SizeHeader).write(SizeHeader { size }) };

        // Safety: the allocation has HEADER_SIZE + size (or more, if rounded
        // up to a size class) bytes, so the offset pointer stays within the
        // same allocated object.
        unsafe { base.byte_add(HEADER_SIZE) }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, new_size: usize) -> *mut c_void {
        if ptr.is_null() {
            return self.alloc(new_size);
        }

        // Safety: `ptr` is a live allocation from this heap, so it has a
        // header, initialized in alloc.
        let header = unsafe { header_of(ptr) };
        let old_size = unsafe { (*header).size };

        let old_class = Self::class_index(old_size);
        let new_class = Self::class_index(new_size);
        let fits_in_place = match (old_class, new_class) {
            // Same size class: the slot already has room for the new size.
            (Some(old), Some(new)) => old == new,
            // Oversized blocks are allocated with their exact size, so only
            // shrinking (to a still-oversized size) fits. An oversized block
            // is never reclassified into a size class, since its memory came
            // from the backing allocator, not a free list.
            (None, None) => new_size <= old_size,
            _ => false,
        };
        if fits_in_place {
            // The stored size is what free and get_size dispatch on, so it
            // has to track the live size even when the pointer doesn't move.
            unsafe { (*header).size = new_size };
            return ptr;
        }

        let new_ptr = self.alloc(new_size);
        if new_ptr.is_null() {
            // The caller still owns `ptr`, and its size tag is untouched.
            return null_mut();
        }

        // Safety: both pointers point to allocations at least
        // `min(old_size, new_size)` bytes long, and distinct allocations
        // can't overlap.
        unsafe { copy_nonoverlapping(ptr as *const u8, new_ptr as *mut u8, old_size.min(new_size)) };

        // Safety: `ptr` is a live allocation from this heap, and the caller
        // gives up on it by contract when a new pointer is returned.
        unsafe { self.free(ptr) };

        new_ptr
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }

        // Safety: `ptr` is a live allocation from this heap, so it has a
        // header, initialized in alloc (or updated in realloc).
        let header = unsafe { header_of(ptr) };
        let size = unsafe { (*header).size };

        match Self::class_index(size) {
            // Safety: allocations whose stored size falls in a size class
            // came from that class's free list, with the header at the start
            // of the list's item.
            Some(class) => unsafe { self.classes[class].free(header as *mut c_void) },
            // Safety: oversized allocations came straight from the backing
            // allocator, again with the header at the start.
            None => unsafe { self.backing.free(header as *mut c_void) },
        }
    }

    /// Returns the size the allocation was last allocated (or realloc'd)
    /// with.
    unsafe fn get_size(&self, ptr: *mut c_void) -> usize {
        // Safety: `ptr` is a live allocation from this heap, so it has a
        // header, initialized in alloc (or updated in realloc).
        unsafe { (*header_of(ptr)).size }
    }
}

#[cfg(test)]
mod tests {
    use core::{ptr::null_mut, slice};

    use crate::{
        allocators::{Allocator, CrtMalloc, PagedHeap},
        test_platform::TestPlatform,
    };

    /// A spread of sizes hitting the smallest class, middles of classes,
    /// class boundaries, and the oversized direct path.
    const TEST_SIZES: [usize; 8] = [1, 16, 17, 100, 1000, 2048, 2049, 10_000];

    #[test]
    fn get_size_matches_across_unrelated_traffic() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        let mut ptrs = [null_mut(); TEST_SIZES.len()];
        for (ptr, size) in ptrs.iter_mut().zip(TEST_SIZES) {
            *ptr = heap.alloc(size);
            assert!(!ptr.is_null());
            assert_eq!(size, unsafe { heap.get_size(*ptr) });
        }

        // Unrelated allocations and frees elsewhere in the heap shouldn't
        // affect what the live allocations report.
        let unrelated = heap.alloc(40);
        unsafe { heap.free(unrelated) };
        let unrelated = heap.alloc(5000);
        unsafe { heap.free(unrelated) };

        for (ptr, size) in ptrs.iter().zip(TEST_SIZES) {
            assert_eq!(size, unsafe { heap.get_size(*ptr) });
            unsafe { heap.free(*ptr) };
        }
    }

    #[test]
    fn writes_to_one_allocation_do_not_corrupt_others() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        let mut ptrs = [null_mut(); TEST_SIZES.len()];
        for (i, (ptr, size)) in ptrs.iter_mut().zip(TEST_SIZES).enumerate() {
            *ptr = heap.alloc(size);
            // Safety: the allocation is `size` bytes and nothing else points
            // to it.
            let bytes = unsafe { slice::from_raw_parts_mut(*ptr as *mut u8, size) };
            bytes.fill(i as u8);
        }

        // Churn: free every other allocation and allocate over them.
        for ptr in ptrs.iter_mut().step_by(2) {
            unsafe { heap.free(*ptr) };
            *ptr = null_mut();
        }
        let churn_a = heap.alloc(64);
        let churn_b = heap.alloc(3000);
        unsafe { slice::from_raw_parts_mut(churn_a as *mut u8, 64) }.fill(0xff);
        unsafe { slice::from_raw_parts_mut(churn_b as *mut u8, 3000) }.fill(0xff);

        for (i, (ptr, size)) in ptrs.iter().zip(TEST_SIZES).enumerate() {
            if ptr.is_null() {
                continue;
            }
            let bytes = unsafe { slice::from_raw_parts(*ptr as *const u8, size) };
            assert!(
                bytes.iter().all(|&b| b == i as u8),
                "allocation {i} was corrupted by unrelated heap traffic",
            );
        }
    }

    #[test]
    fn realloc_within_a_size_class_is_in_place() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        let ptr = heap.alloc(20);
        for i in 0..20u8 {
            unsafe { (ptr as *mut u8).add(i as usize).write(i) };
        }

        // 20 and 30 both round up to the 32-byte class.
        let resized = unsafe { heap.realloc(ptr, 30) };
        assert_eq!(ptr, resized);
        assert_eq!(30, unsafe { heap.get_size(resized) });
        for i in 0..20u8 {
            assert_eq!(i, unsafe { (resized as *mut u8).add(i as usize).read() });
        }

        unsafe { heap.free(resized) };
    }

    #[test]
    fn realloc_across_size_classes_preserves_contents() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        let ptr = heap.alloc(16);
        for i in 0..16u8 {
            unsafe { (ptr as *mut u8).add(i as usize).write(i) };
        }

        let grown = unsafe { heap.realloc(ptr, 100) };
        assert!(!grown.is_null());
        assert_ne!(ptr, grown, "a different size class means a new block");
        assert_eq!(100, unsafe { heap.get_size(grown) });
        for i in 0..16u8 {
            assert_eq!(i, unsafe { (grown as *mut u8).add(i as usize).read() });
        }

        // Shrinking copies min(old, new) bytes.
        let shrunk = unsafe { heap.realloc(grown, 8) };
        assert!(!shrunk.is_null());
        assert_eq!(8, unsafe { heap.get_size(shrunk) });
        for i in 0..8u8 {
            assert_eq!(i, unsafe { (shrunk as *mut u8).add(i as usize).read() });
        }

        unsafe { heap.free(shrunk) };
    }

    #[test]
    fn realloc_failure_leaves_the_original_intact() {
        use core::cell::Cell;
        use core::ffi::c_void;

        /// A backing allocator that can be switched off mid-test, to make
        /// the heap's page requests start failing on demand.
        struct FusedBacking<'plat> {
            inner: CrtMalloc<'plat>,
            blown: Cell<bool>,
        }
        impl Allocator for FusedBacking<'_> {
            fn alloc(&self, size: usize) -> *mut c_void {
                if self.blown.get() {
                    null_mut()
                } else {
                    self.inner.alloc(size)
                }
            }
            unsafe fn realloc(&self, ptr: *mut c_void, new_size: usize) -> *mut c_void {
                if self.blown.get() {
                    null_mut()
                } else {
                    unsafe { self.inner.realloc(ptr, new_size) }
                }
            }
            unsafe fn free(&self, ptr: *mut c_void) {
                unsafe { self.inner.free(ptr) };
            }
            unsafe fn get_size(&self, ptr: *mut c_void) -> usize {
                unsafe { self.inner.get_size(ptr) }
            }
        }

        let platform = TestPlatform::new();
        let backing = FusedBacking {
            inner: CrtMalloc::new(&platform),
            blown: Cell::new(false),
        };
        let heap = PagedHeap::new(&backing);

        let ptr = heap.alloc(16);
        for i in 0..16u8 {
            unsafe { (ptr as *mut u8).add(i as usize).write(i) };
        }

        // With the backing gone, growing into another (pageless) size class
        // has nowhere to allocate from: the realloc must fail with null and
        // the original block must stay owned by the caller, untouched.
        backing.blown.set(true);
        let grown = unsafe { heap.realloc(ptr, 100) };
        assert!(grown.is_null());
        assert_eq!(16, unsafe { heap.get_size(ptr) });
        for i in 0..16u8 {
            assert_eq!(i, unsafe { (ptr as *mut u8).add(i as usize).read() });
        }

        // The block is still live and freeable as usual.
        unsafe { heap.free(ptr) };
        drop(heap);
        assert_eq!(0, platform.live_allocations());
    }

    #[test]
    fn oversized_allocations_round_trip() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        let ptr = heap.alloc(5000);
        assert!(!ptr.is_null());
        assert_eq!(5000, unsafe { heap.get_size(ptr) });
        unsafe { slice::from_raw_parts_mut(ptr as *mut u8, 5000) }.fill(0xab);

        // Oversized blocks grow by reallocation...
        let grown = unsafe { heap.realloc(ptr, 6000) };
        assert!(!grown.is_null());
        let bytes = unsafe { slice::from_raw_parts(grown as *const u8, 5000) };
        assert!(bytes.iter().all(|&b| b == 0xab));

        // ...but shrink in place while still beyond the largest class.
        let shrunk = unsafe { heap.realloc(grown, 3000) };
        assert_eq!(grown, shrunk);
        assert_eq!(3000, unsafe { heap.get_size(shrunk) });

        unsafe { heap.free(shrunk) };
        // With the oversized block freed and all pages dropped, nothing
        // should be left of the heap.
        drop(heap);
        assert_eq!(0, platform.live_allocations());
    }

    #[test]
    fn free_null_is_a_no_op() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        unsafe { heap.free(null_mut()) };
        let ptr = heap.alloc(8) as *mut u64;
        unsafe { ptr.write(0xfeed_beef) };
        unsafe { heap.free(null_mut()) };
        assert_eq!(0xfeed_beef, unsafe { ptr.read() });
        unsafe { heap.free(ptr as *mut _) };
    }

    #[test]
    fn same_size_class_allocations_share_pages() {
        let platform = TestPlatform::new();
        let crt_malloc = CrtMalloc::new(&platform);
        let heap = PagedHeap::new(&crt_malloc);

        // All of these round up to the 64-byte class, so they should fit in
        // the one page its free list allocates.
        let mut ptrs = [null_mut(); 16];
        for ptr in &mut ptrs {
            *ptr = heap.alloc(50);
        }
        assert_eq!(1, heap.page_count());

        for ptr in ptrs {
            unsafe { heap.free(ptr) };
        }
        assert_eq!(1, heap.page_count(), "pages are kept for reuse until drop");

        drop(heap);
        assert_eq!(0, platform.live_allocations());
    }
}
