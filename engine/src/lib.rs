// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The core of the game engine: the memory allocation subsystem and the
//! cooperative job scheduler built on top of it. Pass-through wrappers over
//! the rendering library (windowing, graphics, fonts, textures, shaders) live
//! outside this crate, behind the [platform] crate's abstraction boundary.

#![no_std]

pub mod allocators;
mod engine;
pub mod jobs;
#[cfg(test)]
mod test_platform;

pub use engine::Engine;
