// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! This crate revolves around the [`Pal`] trait, which can be implemented to
//! provide a "platform implementation" for the game engine. It is split off of
//! the main engine crate so that the engine and the platform implementation
//! can be compiled independently, which appears to speed up compilation time.

#![no_std]
#![warn(missing_docs)]

use core::{ffi::c_void, time::Duration};

/// The "engine side" of [`Pal`], for passing the engine to the platform layer
/// implementation for update callbacks.
pub trait EngineCallbacks {
    /// Run one iteration of the game loop.
    fn iterate(&mut self, platform: &dyn Pal);
}

/// "Platform abstraction layer": a trait for using platform-dependent features
/// from the engine without depending on any platform directly. A full
/// implementation should implement this trait, and also call the engine's
/// "iterate" method at an appropriate cadence, e.g. once per frame.
///
/// All the functions have a `&self` parameter, so that the methods can access
/// some (possibly internally mutable) state, but still keeping the platform
/// object as widely usable as possible (a "platform" is about as global an
/// object as you get). Also, none of these functions are (supposed to be) hot,
/// and this trait is object safe, so using &dyn [`Pal`] should be fine
/// performance-wise, and will hopefully help with compilation times by
/// avoiding generics.
pub trait Pal {
    /// Returns the amount of time elapsed since the platform was initialized.
    fn elapsed(&self) -> Duration;

    /// Print out a string. For very crude debugging.
    fn println(&self, message: &str);

    /// Request the process to exit, with `clean: false` if intending to signal
    /// failure. On a clean exit, the exit may be delayed until a moment later,
    /// e.g. at the end of the current frame of the game loop, and after
    /// resource clean up. In failure cases, the idea is to bail asap, but it's
    /// up to the platform.
    fn exit(&self, clean: bool);

    /// Allocate the given amount of bytes (returning a null pointer on error).
    /// The returned pointer must be aligned to 16 bytes, matching the
    /// alignment guarantees of a typical C malloc. Not called often from the
    /// engine, memory is allocated in big chunks, so this can be slow and
    /// defensively implemented.
    fn malloc(&self, size: usize) -> *mut c_void;

    /// Free the memory allocated by [`Pal::malloc`]. `size` must be the size
    /// the memory was originally allocated with.
    ///
    /// ## Safety
    ///
    /// - Since the implementation is free to free the memory, the memory
    ///   pointed at by the given pointer shouldn't be accessed after calling
    ///   this.
    unsafe fn free(&self, ptr: *mut c_void, size: usize);
}
