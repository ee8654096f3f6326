// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! A minimal embedding of the engine: a desktop [`Pal`] implementation and a
//! frame loop which submits jobs every frame and runs one scheduler tick per
//! frame via [`EngineCallbacks::iterate`].

use std::{
    alloc::{alloc, dealloc, Layout},
    ffi::c_void,
    time::Instant,
};

use engine::{
    allocators::{CrtMalloc, PagedHeap, ALLOC_ALIGN},
    Engine,
};
use platform::{EngineCallbacks, Pal};

struct DesktopPlatform {
    start: Instant,
}

impl DesktopPlatform {
    fn new() -> DesktopPlatform {
        DesktopPlatform {
            start: Instant::now(),
        }
    }

    fn layout_for(size: usize) -> Layout {
        // Zero-size layouts aren't allocatable, so pad empty allocations.
        Layout::from_size_align(size.max(1), ALLOC_ALIGN)
            .expect("allocation sizes should not overflow when padded to alignment")
    }
}

impl Pal for DesktopPlatform {
    fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    fn println(&self, message: &str) {
        println!("{message}");
    }

    fn exit(&self, clean: bool) {
        std::process::exit(if clean { 0 } else { 1 });
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        // Safety: the layout is never zero-sized thanks to layout_for.
        unsafe { alloc(Self::layout_for(size)) as *mut c_void }
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        // Safety: `ptr` came from the alloc call above, and layout_for
        // reconstructs the same layout from the size, which Pal::free
        // requires to be the originally allocated size.
        unsafe { dealloc(ptr as *mut u8, Self::layout_for(size)) };
    }
}

/// Per-frame scratch work: sums a slice into an accumulator field, standing
/// in for the kind of fire-and-forget work a game would queue up.
struct ChecksumTask {
    input: [u64; 64],
    result: u64,
}

fn checksum(data: *mut c_void) {
    // Safety: `data` points to the ChecksumTask owned by main, and nothing
    // else accesses it while the scheduler tick runs.
    let task = unsafe { &mut *(data as *mut ChecksumTask) };
    task.result = task.input.iter().fold(0u64, |acc, &x| acc.wrapping_add(x));
}

fn main() {
    let platform = DesktopPlatform::new();
    let crt_malloc = CrtMalloc::new(&platform);
    let heap = PagedHeap::new(&crt_malloc);
    let mut engine = Engine::new(&heap);

    let mut tasks: Vec<ChecksumTask> = (0..16)
        .map(|i| ChecksumTask {
            input: [i; 64],
            result: 0,
        })
        .collect();

    for frame in 0..60 {
        for task in &mut tasks {
            engine
                .jobs()
                .start_with(task as *mut ChecksumTask as *mut c_void, checksum)
                .expect("the paged heap should have memory for job records");
        }
        engine.iterate(&platform);

        if frame % 20 == 0 {
            let total: u64 = tasks.iter().map(|task| task.result).sum();
            platform.println(&format!(
                "frame {frame:2}: checksum total {total}, {} heap pages, {:?} elapsed",
                heap.page_count(),
                platform.elapsed(),
            ));
        }
    }

    drop(engine);
    platform.exit(true);
}
