// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Image Serializer
//!
//! This module writes the byte representation of a memory image. Sections are emitted in
//! ascending target address order; RESERVED sections exist only to keep the builder from placing
//! overlapping content and are omitted from the output entirely.
//!

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    format::{
        self,
        ModuleHeader,
        MAGIC,
        VERSION,
    },
    image::{
        MemImage,
        Section,
        SectionSource,
    },
};
use ::anyhow::Result;
use ::std::io::Write;

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// A binary output stream for little-endian image data. The writer counts the bytes that it has
/// emitted, so that the builder can report the size of the finished image.
///
pub struct ImageWriter<W: Write> {
    /// Underlying output stream.
    out: W,
    /// Number of bytes written so far.
    written: usize,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl<W: Write> ImageWriter<W> {
    ///
    /// # Description
    ///
    /// Creates an image writer on top of an output stream.
    ///
    /// # Parameters
    ///
    /// - `out`: Underlying output stream.
    ///
    /// # Returns
    ///
    /// The image writer that was created.
    ///
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Writes raw bytes to the output stream.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if let Err(e) = self.out.write_all(bytes) {
            let reason: String = format!("unable to write to output file (error={})", e);
            error!("write_bytes(): {}", reason);
            anyhow::bail!(reason);
        }
        self.written += bytes.len();
        Ok(())
    }

    /// Writes a word to the output stream in little-endian byte order.
    pub fn write_word(&mut self, word: u32) -> Result<()> {
        self.write_bytes(&word.to_le_bytes())
    }

    ///
    /// # Description
    ///
    /// Flushes the output stream and reports the number of bytes written.
    ///
    /// # Returns
    ///
    /// Upon successful completion, the number of bytes written is returned. Otherwise, an error
    /// is returned instead.
    ///
    pub fn finish(mut self) -> Result<usize> {
        if let Err(e) = self.out.flush() {
            let reason: String = format!("unable to write to output file (error={})", e);
            error!("finish(): {}", reason);
            anyhow::bail!(reason);
        }
        Ok(self.written)
    }
}

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Writes the byte representation of a memory image: magic number, version word, entry point, and
/// then every section in ascending target address order.
///
/// # Parameters
///
/// - `writer`: Output stream.
/// - `mimg`: Memory image to serialize.
///
/// # Returns
///
/// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
///
pub fn write_image<W: Write>(writer: &mut ImageWriter<W>, mimg: &MemImage) -> Result<()> {
    writer.write_bytes(&MAGIC)?;
    writer.write_word(VERSION)?;
    writer.write_word(mimg.entry())?;
    for section in mimg.sections() {
        write_section(writer, mimg, section)?;
    }
    Ok(())
}

///
/// # Description
///
/// Writes the byte representation of a single section: its header, then its payload. DATA
/// sections carry `last - first + 1` bytes from their file image; BOOTDATA sections carry the
/// per-module header records; ZERO sections carry nothing; RESERVED sections are skipped.
///
/// # Parameters
///
/// - `writer`: Output stream.
/// - `mimg`: Memory image that owns the section.
/// - `section`: Section to serialize.
///
/// # Returns
///
/// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
///
fn write_section<W: Write>(
    writer: &mut ImageWriter<W>,
    mimg: &MemImage,
    section: &Section,
) -> Result<()> {
    if let SectionSource::Reserved = section.source {
        return Ok(());
    }

    writer.write_word(section.first)?;
    writer.write_word(section.last)?;
    writer.write_word(0)?; // prev
    writer.write_word(section.section_type().to_word())?;

    match &section.source {
        SectionSource::Data { img, offset } => {
            let len: usize = (section.last - section.first) as usize + 1;
            let payload: &[u8] = match img.contents.get(*offset..*offset + len) {
                Some(payload) => payload,
                None => {
                    let reason: String = format!(
                        "section data passes end of file \"{}\"",
                        img.filename
                    );
                    error!("write_section(): {}", reason);
                    anyhow::bail!(reason);
                },
            };
            writer.write_bytes(payload)?;
        },
        SectionSource::BootData => {
            write_headers(writer, mimg.headers(), section.first, section.last)?;
        },
        _ => (),
    }

    Ok(())
}

///
/// # Description
///
/// Writes the payload of a BOOTDATA section: a count word followed by the per-module header
/// records, after checking that the target range leaves room for the boot data that the loader
/// appends at load time.
///
/// # Parameters
///
/// - `writer`: Output stream.
/// - `headers`: Per-module header records.
/// - `first`: First address of the BOOTDATA target range.
/// - `last`: Last address of the BOOTDATA target range.
///
/// # Returns
///
/// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
///
fn write_headers<W: Write>(
    writer: &mut ImageWriter<W>,
    headers: &[ModuleHeader],
    first: u32,
    last: u32,
) -> Result<()> {
    let count: u32 = headers.len() as u32;
    let required: u64 = format::bootlen(count);
    if u64::from(last - first) + 1 < required {
        let reason: String = format!(
            "headers will not fit in [{:#x}-{:#x}]: at least {:#x} bytes required",
            first, last, required
        );
        error!("write_headers(): {}", reason);
        anyhow::bail!(reason);
    }

    writer.write_word(count)?;
    for hdr in headers {
        writer.write_word(hdr.min_addr)?;
        writer.write_word(hdr.max_addr)?;
        writer.write_word(hdr.entry)?;
    }
    Ok(())
}

//==================================================================================================
// Unit Tests
//==================================================================================================
