// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Loader Errors
//!
//! This module defines the error type that is reported by the boot-time loader. The loader runs
//! before any allocator is available, so every error is a plain enumeration whose diagnostic text
//! is a static string. The diagnostic strings are a stable interface: boot scripts and tests match
//! on them verbatim.
//!

//==================================================================================================
// Imports
//==================================================================================================

use ::std::fmt;

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// Errors that may be reported while locating, validating, or loading a memory image.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// The bootstrap did not supply the expected multiboot magic value.
    InvalidMultibootMagic,
    /// The multiboot information carries neither a memory map nor memory bounds.
    NoMemoryMap,
    /// The multiboot information does not describe any boot modules.
    NoModuleList,
    /// The boot module list is empty.
    NoModules,
    /// More than one boot module was supplied.
    MultipleModules,
    /// The image range is empty.
    StartExceedsFinish,
    /// The image is smaller than the image header.
    ImageTooSmall,
    /// The image does not begin with the expected magic number.
    BadMagic,
    /// The image entry point is the missing-entry sentinel.
    NoEntryPoint,
    /// A section header extends past the end of the image.
    IncompleteSectionHeader,
    /// A section describes an empty target range.
    FirstExceedsLast,
    /// Section target ranges are not sorted, or they overlap.
    OverlappingSections,
    /// A section target range is not backed by available memory.
    OutsideMemoryMap,
    /// A section target range intersects the loader's own footprint.
    OverlapsLoader,
    /// A BOOTDATA range is too small for its header records and boot data.
    BootDataTooSmall,
    /// A section payload extends past the end of the image.
    SectionDoesNotFit,
    /// A section payload wraps around the 32-bit address space.
    SectionWraps,
    /// No DATA section covers the image entry point.
    EntryNotLoaded,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl BootError {
    ///
    /// # Description
    ///
    /// Returns the diagnostic string for the error.
    ///
    /// # Returns
    ///
    /// A static string describing the error.
    ///
    pub fn as_str(&self) -> &'static str {
        match self {
            BootError::InvalidMultibootMagic => "invalid multiboot magic",
            BootError::NoMemoryMap => "cannot obtain memory map",
            BootError::NoModuleList => "cannot locate memory image",
            BootError::NoModules => "no boot modules specified",
            BootError::MultipleModules => "multiple boot modules specified",
            BootError::StartExceedsFinish => "image start exceeds image finish",
            BootError::ImageTooSmall => "image is too small",
            BootError::BadMagic => "image has incorrect magic number",
            BootError::NoEntryPoint => "image does not specify an entry point",
            BootError::IncompleteSectionHeader => "incomplete section header",
            BootError::FirstExceedsLast => "section first exceeds section last",
            BootError::OverlappingSections => "sections overlap or are not sorted",
            BootError::OutsideMemoryMap => "section does not fit within memory map",
            BootError::OverlapsLoader => "section overlaps with loader",
            BootError::BootDataTooSmall => "bootdata section is too small",
            BootError::SectionDoesNotFit => "section does not fit in image",
            BootError::SectionWraps => "section wraps around address space",
            BootError::EntryNotLoaded => "entry point falls outside loaded sections",
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for BootError {}

//==================================================================================================
// Unit Tests
//==================================================================================================
