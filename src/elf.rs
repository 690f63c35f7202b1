// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # ELF File Parser
//!
//! This module provides a simple parser for ELF files. The builder accepts 32-bit executable
//! images for Intel 80386 targets in either byte order: every multi-byte field is decoded
//! according to the data encoding that the ELF header declares, never through host-order casts.
//!

//==================================================================================================
// Lint Exceptions
//==================================================================================================

// Not all constants are used.
#![allow(dead_code)]

//==================================================================================================
// Imports
//==================================================================================================

use crate::format::Addr;
use ::anyhow::Result;

//==================================================================================================
// Constants
//==================================================================================================

// ELF magic numbers.
const ELFMAG0: u8 = 0x7f; // ELF magic number 0.
const ELFMAG1: u8 = b'E'; // ELF magic number 1.
const ELFMAG2: u8 = b'L'; // ELF magic number 2.
const ELFMAG3: u8 = b'F'; // ELF magic number 3.

// Indexes into the identification bytes.
const EI_CLASS: usize = 4; // File class.
const EI_DATA: usize = 5; // Data encoding.

// File classes.
const ELFCLASSNONE: u8 = 0; // Invalid class.
const ELFCLASS32: u8 = 1; // 32-bit object.
const ELFCLASS64: u8 = 2; // 64-bit object.

// Data encoding types.
const ELFDATANONE: u8 = 0; // Invalid data encoding.
const ELFDATA2LSB: u8 = 1; // Least significant byte in the lowest address.
const ELFDATA2MSB: u8 = 2; // Most significant byte in the lowest address.

// Object file types.
const ET_NONE: u16 = 0; // No file type.
const ET_REL: u16 = 1; // Relocatable file.
const ET_EXEC: u16 = 2; // Executable file.
const ET_DYN: u16 = 3; // Shared object file.
const ET_CORE: u16 = 4; // Core file.

// Required machine architecture types.
const EM_NONE: u16 = 0; // No machine.
const EM_386: u16 = 3; // Intel 80386.

// Segment types.
const PT_NULL: u32 = 0; // Unused segment.
const PT_LOAD: u32 = 1; // Loadable segment.
const PT_DYNAMIC: u32 = 2; // Dynamic linking.
const PT_INTERP: u32 = 3; // Interpreter.
const PT_NOTE: u32 = 4; // Auxiliary information.

// Field offsets in the ELF 32 file header.
const E_TYPE: usize = 16; // Object file type.
const E_MACHINE: usize = 18; // Required machine architecture type.
const E_VERSION: usize = 20; // Object file version.
const E_ENTRY: usize = 24; // Virtual address of the entry point.
const E_PHOFF: usize = 28; // Program header table file offset.
const E_EHSIZE: usize = 40; // ELF header size in bytes.
const E_PHENTSIZE: usize = 42; // Program header table entry size.
const E_PHNUM: usize = 44; // Entries in the program header table.

// Field offsets in an ELF 32 program header.
const P_TYPE: usize = 0; // Segment type.
const P_OFFSET: usize = 4; // Offset of the first byte in the file.
const P_VADDR: usize = 8; // Virtual address of the first byte.
const P_PADDR: usize = 12; // Physical address of the first byte.
const P_FILESZ: usize = 16; // Bytes in the file image.
const P_MEMSZ: usize = 20; // Bytes in the memory image.

/// Size of the ELF 32 file header in bytes.
const EHDR_LEN: usize = 52;

/// Size of an ELF 32 program header in bytes.
const PHDR_LEN: usize = 32;

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// A parsed view of a 32-bit ELF executable. The view borrows the raw file bytes and decodes
/// header fields on demand, honoring the data encoding that the file declares.
///
pub struct Elf32<'a> {
    /// Raw bytes of the ELF file.
    bytes: &'a [u8],
    /// Declared data encoding ([`ELFDATA2LSB`] or [`ELFDATA2MSB`]).
    encoding: u8,
}

///
/// # Description
///
/// A loadable segment of an ELF executable.
///
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Offset of the first segment byte in the file.
    pub offset: u32,
    /// Physical address of the first segment byte.
    pub paddr: Addr,
    /// Number of segment bytes stored in the file.
    pub filesz: u32,
    /// Number of segment bytes in the memory image.
    pub memsz: u32,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl<'a> Elf32<'a> {
    ///
    /// # Description
    ///
    /// Parses the header of an ELF file and checks that it names a 32-bit Intel 80386 executable.
    ///
    /// # Parameters
    ///
    /// - `bytes`: Raw bytes of the ELF file.
    ///
    /// # Returns
    ///
    /// A parsed view of the file, or `None` if the file is not an ELF executable that the builder
    /// accepts.
    ///
    pub fn parse(bytes: &'a [u8]) -> Option<Elf32<'a>> {
        if bytes.len() < EHDR_LEN {
            return None;
        }
        if bytes[0] != ELFMAG0 || bytes[1] != ELFMAG1 || bytes[2] != ELFMAG2 || bytes[3] != ELFMAG3
        {
            return None;
        }
        if bytes[EI_CLASS] != ELFCLASS32 {
            return None;
        }
        let encoding: u8 = bytes[EI_DATA];
        if encoding != ELFDATA2LSB && encoding != ELFDATA2MSB {
            return None;
        }

        let elf: Elf32 = Elf32 { bytes, encoding };
        if elf.half(E_TYPE) != ET_EXEC
            || elf.half(E_MACHINE) != EM_386
            || elf.half(E_EHSIZE) != EHDR_LEN as u16
            || elf.half(E_PHENTSIZE) != PHDR_LEN as u16
        {
            return None;
        }

        Some(elf)
    }

    /// Decodes the half word at `offset`, honoring the declared data encoding.
    fn half(&self, offset: usize) -> u16 {
        let raw: [u8; 2] = [self.bytes[offset], self.bytes[offset + 1]];
        if self.encoding == ELFDATA2MSB {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        }
    }

    /// Decodes the word at `offset`, honoring the declared data encoding.
    fn word(&self, offset: usize) -> u32 {
        let raw: [u8; 4] = [
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ];
        if self.encoding == ELFDATA2MSB {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        }
    }

    /// Entry point of the executable.
    pub fn entry(&self) -> Addr {
        self.word(E_ENTRY)
    }

    ///
    /// # Description
    ///
    /// Enumerates the loadable segments of the executable, in program header table order.
    ///
    /// # Returns
    ///
    /// Upon successful completion, the loadable segments are returned. Otherwise, an error is
    /// returned instead.
    ///
    pub fn segments(&self) -> Result<Vec<Segment>> {
        let phoff: u32 = self.word(E_PHOFF);
        let phnum: u16 = self.half(E_PHNUM);

        let mut segments: Vec<Segment> = Vec::new();
        if phoff == 0 || phnum == 0 {
            return Ok(segments);
        }

        // The program header table must lie inside the file.
        if u64::from(phoff) + u64::from(phnum) * PHDR_LEN as u64 > self.bytes.len() as u64 {
            let reason: String = "invalid ELF section passes end of file".to_string();
            error!("segments(): {}", reason);
            anyhow::bail!(reason);
        }

        for i in 0..phnum {
            let base: usize = phoff as usize + i as usize * PHDR_LEN;
            if self.word(base + P_TYPE) != PT_LOAD {
                continue;
            }

            let segment: Segment = Segment {
                offset: self.word(base + P_OFFSET),
                paddr: self.word(base + P_PADDR),
                filesz: self.word(base + P_FILESZ),
                memsz: self.word(base + P_MEMSZ),
            };

            // Segment bytes must lie inside the file.
            if u64::from(segment.offset) + u64::from(segment.filesz) > self.bytes.len() as u64 {
                let reason: String = "invalid ELF section passes end of file".to_string();
                error!("segments(): {}", reason);
                anyhow::bail!(reason);
            }

            segments.push(segment);
        }

        Ok(segments)
    }
}

//==================================================================================================
// Test Fixtures
//==================================================================================================


//==================================================================================================
// Unit Tests
//==================================================================================================
