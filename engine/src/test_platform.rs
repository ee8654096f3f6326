// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, ffi::c_void, time::Duration};

use platform::Pal;

/// A [`Pal`] implementation for the engine's unit tests: allocates with libc
/// and keeps count of the allocations, so tests can assert on page counts
/// and leak-freedom.
pub struct TestPlatform {
    elapsed_millis: Cell<u64>,
    live_allocations: Cell<usize>,
}

impl TestPlatform {
    pub fn new() -> TestPlatform {
        TestPlatform {
            elapsed_millis: Cell::new(0),
            live_allocations: Cell::new(0),
        }
    }

    /// Sets the time [`Pal::elapsed`] reports, for simulating frame pacing.
    pub fn set_elapsed_millis(&self, millis: u64) {
        self.elapsed_millis.set(millis);
    }

    /// The amount of [`Pal::malloc`]s without a matching [`Pal::free`].
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.get()
    }
}

impl Pal for TestPlatform {
    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_millis.get())
    }

    fn println(&self, _message: &str) {}

    fn exit(&self, clean: bool) {
        panic!("TestPlatform::exit({clean}) was called");
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        // Zero-size mallocs may return null, which the engine treats as
        // out-of-memory, so always ask for at least a byte.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        if !ptr.is_null() {
            self.live_allocations.set(self.live_allocations.get() + 1);
        }
        ptr as *mut c_void
    }

    unsafe fn free(&self, ptr: *mut c_void, _size: usize) {
        if ptr.is_null() {
            return;
        }
        self.live_allocations.set(self.live_allocations.get() - 1);
        // Safety: `ptr` came from the malloc above, per Pal::free's contract.
        unsafe { libc::free(ptr as *mut libc::c_void) };
    }
}
