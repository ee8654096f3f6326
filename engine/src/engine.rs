// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use platform::{EngineCallbacks, Pal};

use crate::{allocators::Allocator, jobs::JobScheduler};

/// The top-level structure of the game engine which owns all the runtime
/// state of the game engine and has methods for running the engine.
pub struct Engine<'eng> {
    /// Scheduler for work that runs within the engine's update loop. One
    /// tick per frame.
    jobs: JobScheduler<'eng>,
    frame_count: u64,
}

impl<'eng> Engine<'eng> {
    /// Creates a new instance of the engine.
    ///
    /// - `allocator`: the allocator backing the engine's internal
    ///   allocations, e.g. job records. Needs to outlive the engine so that
    ///   engine internals can borrow from it, so it's passed in here instead
    ///   of being created behind the scenes. Generally a
    ///   [`PagedHeap`](crate::allocators::PagedHeap) over the platform's
    ///   allocator.
    pub fn new(allocator: &'eng dyn Allocator) -> Engine<'eng> {
        Engine {
            jobs: JobScheduler::new(allocator),
            frame_count: 0,
        }
    }

    /// The job scheduler, for queueing up work to run on the next frame.
    pub fn jobs(&self) -> &JobScheduler<'eng> {
        &self.jobs
    }

    /// The amount of game loop iterations run so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl EngineCallbacks for Engine<'_> {
    fn iterate(&mut self, _platform: &dyn Pal) {
        self.jobs.update_jobs();
        self.frame_count += 1;
    }
}
