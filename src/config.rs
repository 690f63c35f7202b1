// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Configuration
//!
//! This module provides various configuration parameters.
//!

/// Default name of the program.
pub const PROGRAM_NAME: &str = "mimgmake";

/// Alignment shift for page placement.
pub const PAGE_SHIFT: u32 = 12;
