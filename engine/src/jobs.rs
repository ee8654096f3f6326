// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, ffi::c_void, fmt::Debug, ptr::null_mut};

use crate::allocators::Allocator;

/// The function a [`Job`] runs, called with the job's data pointer.
pub type JobFn = fn(*mut c_void);

/// One unit of scheduled work: an opaque data pointer and the function to
/// call with it.
///
/// The scheduler never dereferences nor frees `data`, its lifetime and
/// contents are entirely the submitter's concern. That includes error
/// reporting: there's no channel for a job to report failure to the
/// scheduler, a job that can fail should write its status into its data for
/// the submitter to inspect.
#[derive(Clone, Copy, Debug)]
pub struct Job {
    /// Passed to `execute` as-is when the job runs.
    pub data: *mut c_void,
    /// The function that does the job's work.
    pub execute: JobFn,
}

/// A pending job and its link in the scheduler's queue, allocated from the
/// scheduler's allocator, freed as soon as the job has executed.
#[repr(C)]
struct JobRecord {
    job: Job,
    next: *mut JobRecord,
}

/// Cooperative job scheduler: jobs submitted with [`JobScheduler::start`] are
/// queued up, and each [`JobScheduler::update_jobs`] call (one "tick",
/// expected to be run once per frame) executes the queued jobs in submission
/// order.
///
/// Everything runs synchronously on the calling thread, there's no worker
/// pool and no internal synchronization, so a long-running job stalls the
/// whole tick. There's also no cancellation: once submitted, a job will run
/// on a future tick. Job records are allocated from the [`Allocator`] given
/// at construction, one small allocation per job, so a [`PagedHeap`] backing
/// recycles them through a single size class.
///
/// [`PagedHeap`]: crate::allocators::PagedHeap
pub struct JobScheduler<'alc> {
    allocator: &'alc dyn Allocator,
    /// First pending record, null when the queue is empty.
    head: Cell<*mut JobRecord>,
    /// Last pending record, for constant-time FIFO appends. Null exactly when
    /// `head` is.
    tail: Cell<*mut JobRecord>,
    /// Length of the pending queue.
    pending: Cell<usize>,
}

impl Debug for JobScheduler<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<'alc> JobScheduler<'alc> {
    /// Creates a scheduler which allocates its job records from `allocator`.
    pub fn new(allocator: &'alc dyn Allocator) -> JobScheduler<'alc> {
        JobScheduler {
            allocator,
            head: Cell::new(null_mut()),
            tail: Cell::new(null_mut()),
            pending: Cell::new(0),
        }
    }

    /// Queues the job to run on the next [`JobScheduler::update_jobs`] call.
    /// Never blocks and never runs the job inline. If allocating the job
    /// record fails, the job is handed back in the `Err`.
    pub fn start(&self, job: Job) -> Result<(), Job> {
        let record = self.allocator.alloc(size_of::<JobRecord>()) as *mut JobRecord;
        if record.is_null() {
            return Err(job);
        }
        // Safety: the allocation is size_of::<JobRecord>() bytes, aligned to
        // ALLOC_ALIGN per the Allocator contract, which covers JobRecord's
        // alignment.
        unsafe { record.write(JobRecord { job, next: null_mut() }) };

        let tail = self.tail.get();
        if tail.is_null() {
            self.head.set(record);
        } else {
            // Safety: `tail` was allocated and written in an earlier call,
            // and records are only freed once they're detached from the
            // queue, in update_jobs or drop.
            unsafe { (*tail).next = record };
        }
        self.tail.set(record);
        self.pending.set(self.pending.get() + 1);
        Ok(())
    }

    /// [`JobScheduler::start`], but constructs the [`Job`] from its parts.
    pub fn start_with(&self, data: *mut c_void, execute: JobFn) -> Result<(), Job> {
        self.start(Job { data, execute })
    }

    /// The amount of jobs queued up for the next tick.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Runs one scheduler tick: executes every currently pending job in
    /// submission order, freeing each job's record right after it returns.
    ///
    /// The pending queue is detached before anything runs, so jobs started
    /// from within a job land on a fresh queue and run on the *next* tick.
    /// That bounds the length of a tick by the jobs pending at its start,
    /// even if the jobs keep submitting follow-up work every tick.
    ///
    /// Must not be called from within a job; jobs interact with the scheduler
    /// through [`JobScheduler::start`] only.
    pub fn update_jobs(&self) {
        let mut record = self.head.replace(null_mut());
        self.tail.set(null_mut());
        self.pending.set(0);

        while !record.is_null() {
            // Safety: `record` was written in start and is only freed below,
            // after which the loop doesn't touch it again.
            let job = unsafe { (*record).job };
            let next = unsafe { (*record).next };

            (job.execute)(job.data);

            // The job has completed and the record's only purpose was to
            // carry it here. The job's data still belongs to the submitter.
            //
            // Safety: `record` is a live allocation from self.allocator, made
            // in start, detached from the queue at the top of this function.
            unsafe { self.allocator.free(record as *mut c_void) };
            record = next;
        }
    }
}

impl Drop for JobScheduler<'_> {
    fn drop(&mut self) {
        // Jobs that never got to run don't run on drop either, but their
        // records go back to the allocator.
        let mut record = self.head.get();
        while !record.is_null() {
            // Safety: same as the record handling in update_jobs.
            let next = unsafe { (*record).next };
            unsafe { self.allocator.free(record as *mut c_void) };
            record = next;
        }
    }
}
