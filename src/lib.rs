// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Memory Image Toolchain
//!
//! This crate packages executables and auxiliary regions into a single binary memory image, and
//! loads such images at boot time into a fixed set of physical addresses. The host-side builder
//! (the `mimgmake` binary) reads ELF executables and raw data files, places their bytes at
//! caller-specified physical addresses, and serializes an image file. The target-side loader core
//! validates an image delivered as the sole multiboot module, materializes its sections, and
//! hands back the entry point to jump to.
//!

//==================================================================================================
// Configuration
//==================================================================================================

#![deny(clippy::all)]

//==================================================================================================
// Modules
//==================================================================================================

pub mod args;
pub mod config;
pub mod elf;
pub mod error;
pub mod format;
pub mod image;
pub mod loader;
pub mod logging;
pub mod mboot;
pub mod memory;
pub mod output;

//==================================================================================================
// Imports
//==================================================================================================

// Must come first.
#[macro_use]
extern crate log;
