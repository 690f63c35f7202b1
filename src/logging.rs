// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Logging
//!
//! This module provides logging facilities.
//!

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Initializes the logger. The log specification is taken from the `RUST_LOG` environment
/// variable when set, and defaults to `info` otherwise. If the logger cannot be initialized, the
/// program panics.
///
pub fn initialize() {
    flexi_logger::Logger::try_with_env_or_str("info")
        .expect("malformed log specification")
        .start()
        .expect("failed to initialize logger");
}
