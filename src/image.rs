// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Memory Image Placement Model
//!
//! This module provides the builder's in-memory representation of an image: an ordered list of
//! sections keyed by ascending target address, a parallel list of per-module header records in
//! argument order, a cursor that tracks the most recently inserted section, and an optional
//! explicit entry point.
//!

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    elf::{
        Elf32,
        Segment,
    },
    format::{
        Addr,
        ModuleHeader,
        SectionType,
        NOENTRY,
    },
};
use ::anyhow::Result;
use ::std::{
    fmt,
    fs,
    rc::Rc,
};

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// The contents of an input file, read into memory once and shared by every section that was
/// carved out of it.
///
pub struct FileImage {
    /// Name of the file.
    pub filename: String,
    /// Contents of the file.
    pub contents: Vec<u8>,
}

///
/// # Description
///
/// The source of the bytes that a section materializes at load time.
///
pub enum SectionSource {
    /// Target range is zero-filled.
    Zero,
    /// Target range is filled from a slice of an input file.
    Data {
        /// File that provides the bytes.
        img: Rc<FileImage>,
        /// Offset of the first byte in the file.
        offset: usize,
    },
    /// Target range receives header records and boot data.
    BootData,
    /// Target range is claimed, but nothing is materialized.
    Reserved,
}

///
/// # Description
///
/// One section of a memory image under construction.
///
pub struct Section {
    /// First address of the target range.
    pub first: Addr,
    /// Last address of the target range.
    pub last: Addr,
    /// Source of the section bytes.
    pub source: SectionSource,
}

///
/// # Description
///
/// A memory image under construction.
///
pub struct MemImage {
    /// Sections, in ascending target address order.
    sections: Vec<Section>,
    /// Per-module header records, in argument order.
    headers: Vec<ModuleHeader>,
    /// Index of the most recently inserted section.
    mri: Option<usize>,
    /// Entry point, or [`NOENTRY`] until one is chosen.
    entry: Addr,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl FileImage {
    ///
    /// # Description
    ///
    /// Reads the contents of a file into a shared buffer.
    ///
    /// # Parameters
    ///
    /// - `filename`: Name of the file.
    ///
    /// # Returns
    ///
    /// Upon successful completion, the file image is returned. Otherwise, an error is returned
    /// instead.
    ///
    pub fn read(filename: &str) -> Result<Rc<FileImage>> {
        trace!("read(): {}", filename);

        let contents: Vec<u8> = match fs::read(filename) {
            Ok(contents) => contents,
            Err(e) => {
                let reason: String = format!("could not read file \"{}\" (error={})", filename, e);
                error!("read(): {}", reason);
                anyhow::bail!(reason);
            },
        };

        if contents.is_empty() {
            let reason: String = format!("file \"{}\" is empty", filename);
            error!("read(): {}", reason);
            anyhow::bail!(reason);
        }

        Ok(Rc::new(FileImage {
            filename: filename.to_string(),
            contents,
        }))
    }
}

impl Section {
    ///
    /// # Description
    ///
    /// Creates a new section.
    ///
    /// # Parameters
    ///
    /// - `first`: First address of the target range.
    /// - `last`: Last address of the target range.
    /// - `source`: Source of the section bytes.
    ///
    /// # Returns
    ///
    /// Upon successful completion, the section is returned. Otherwise, an error is returned
    /// instead.
    ///
    pub fn new(first: Addr, last: Addr, source: SectionSource) -> Result<Section> {
        if first > last {
            let reason: String = format!("empty section [{:#010x}-{:#010x}]", first, last);
            error!("new(): {}", reason);
            anyhow::bail!(reason);
        }
        Ok(Section {
            first,
            last,
            source,
        })
    }

    /// The on-disk type of the section.
    pub fn section_type(&self) -> SectionType {
        match self.source {
            SectionSource::Zero => SectionType::Zero,
            SectionSource::Data { .. } => SectionType::Data,
            SectionSource::BootData => SectionType::BootData,
            SectionSource::Reserved => SectionType::Reserved,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}-{:#010x}] ", self.first, self.last)?;
        match &self.source {
            SectionSource::Data { img, offset } => {
                write!(f, "from \"{}\", offset {:#x}", img.filename, offset)
            },
            _ => write!(f, "type {}", self.section_type().to_word()),
        }
    }
}

impl MemImage {
    ///
    /// # Description
    ///
    /// Creates an empty memory image.
    ///
    /// # Returns
    ///
    /// The memory image that was created.
    ///
    pub fn new() -> MemImage {
        MemImage {
            sections: Vec::new(),
            headers: Vec::new(),
            mri: None,
            entry: NOENTRY,
        }
    }

    /// Sections of the image, in ascending target address order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Per-module header records, in argument order.
    pub fn headers(&self) -> &[ModuleHeader] {
        &self.headers
    }

    /// Entry point of the image.
    pub fn entry(&self) -> Addr {
        self.entry
    }

    ///
    /// # Description
    ///
    /// Sets the explicit entry point of the image. Setting the same entry point twice is
    /// harmless; setting two different entry points is an error.
    ///
    /// # Parameters
    ///
    /// - `addr`: Entry point address.
    ///
    /// # Returns
    ///
    /// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
    ///
    pub fn set_entry(&mut self, addr: Addr) -> Result<()> {
        if self.entry != NOENTRY && addr != self.entry {
            let reason: String = format!(
                "multiple entry points ({:#x}, {:#x}) specified",
                self.entry, addr
            );
            error!("set_entry(): {}", reason);
            anyhow::bail!(reason);
        }
        self.entry = addr;
        Ok(())
    }

    ///
    /// # Description
    ///
    /// Inserts a section into the image, keeping sections sorted by ascending target address.
    /// The most-recently-inserted cursor is moved to the new section, even when the insertion
    /// point is in the middle of the list.
    ///
    /// # Parameters
    ///
    /// - `section`: Section to insert.
    ///
    /// # Returns
    ///
    /// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
    ///
    pub fn insert(&mut self, section: Section) -> Result<()> {
        // Find the insertion point, checking every section that the new one could collide with.
        let mut pos: usize = 0;
        for (i, existing) in self.sections.iter().enumerate() {
            if section.last < existing.first {
                break;
            }
            if section.first <= existing.last {
                let reason: String =
                    format!("overlapping sections: {} vs {}", existing, section);
                error!("insert(): {}", reason);
                anyhow::bail!(reason);
            }
            pos = i + 1;
        }

        self.sections.insert(pos, section);
        self.mri = Some(pos);
        Ok(())
    }

    ///
    /// # Description
    ///
    /// Computes the first address after the most recently inserted section, rounded up to the
    /// requested power-of-two alignment.
    ///
    /// # Parameters
    ///
    /// - `align`: Alignment, in bits. Zero yields the next byte; twelve the next 4 KiB boundary.
    /// - `arg`: Argument being processed, for diagnostics.
    ///
    /// # Returns
    ///
    /// Upon successful completion, the address is returned. Otherwise, an error is returned
    /// instead.
    ///
    pub fn next_addr(&self, align: u32, arg: &str) -> Result<Addr> {
        let mri: &Section = match self.mri {
            Some(i) => &self.sections[i],
            None => {
                let reason: String =
                    format!("no previous loaded section for argument \"{}\"", arg);
                error!("next_addr(): {}", reason);
                anyhow::bail!(reason);
            },
        };

        let next: u64 = ((u64::from(mri.last) >> align) + 1) << align;
        if next > u64::from(Addr::MAX) {
            let reason: String = format!("address overflow in argument \"{}\"", arg);
            error!("next_addr(): {}", reason);
            anyhow::bail!(reason);
        }
        Ok(next as Addr)
    }

    /// Appends a per-module header record.
    pub fn add_header(&mut self, min_addr: Addr, max_addr: Addr, entry: Addr) {
        self.headers.push(ModuleHeader {
            min_addr,
            max_addr,
            entry,
        });
    }

    ///
    /// # Description
    ///
    /// Inserts the contents of a raw file as a DATA section at the given address, and registers a
    /// header record without an entry point.
    ///
    /// # Parameters
    ///
    /// - `filename`: Name of the file.
    /// - `first`: Address of the first byte of the file in the target address space.
    ///
    /// # Returns
    ///
    /// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
    ///
    pub fn insert_file(&mut self, filename: &str, first: Addr) -> Result<()> {
        trace!("insert_file(): {} at {:#010x}", filename, first);

        let img: Rc<FileImage> = FileImage::read(filename)?;
        let last: u64 = u64::from(first) + img.contents.len() as u64 - 1;
        if last > u64::from(Addr::MAX) {
            let reason: String = format!(
                "file \"{}\" does not fit below the 4 GiB boundary at {:#010x}",
                filename, first
            );
            error!("insert_file(): {}", reason);
            anyhow::bail!(reason);
        }
        let last: Addr = last as Addr;

        self.insert(Section::new(first, last, SectionSource::Data { img, offset: 0 })?)?;
        self.add_header(first, last, NOENTRY);
        Ok(())
    }

    ///
    /// # Description
    ///
    /// Inserts the loadable segments of an ELF executable. In load mode, each segment yields a
    /// DATA section for its file-backed bytes and a ZERO section for its BSS tail, and a header
    /// record carrying the executable's entry point is registered. In reserve mode, each segment
    /// yields a single RESERVED section and no header record.
    ///
    /// # Parameters
    ///
    /// - `filename`: Name of the ELF file.
    /// - `load`: Load mode (`true`) or reserve mode (`false`).
    ///
    /// # Returns
    ///
    /// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
    ///
    pub fn insert_elf(&mut self, filename: &str, load: bool) -> Result<()> {
        trace!("insert_elf(): {} (load={})", filename, load);

        let img: Rc<FileImage> = FileImage::read(filename)?;
        let elf: Elf32 = match Elf32::parse(&img.contents) {
            Some(elf) => elf,
            None => {
                let reason: String =
                    format!("input file \"{}\" is not in ELF format", filename);
                error!("insert_elf(): {}", reason);
                anyhow::bail!(reason);
            },
        };

        let entry: Addr = elf.entry();
        let segments: Vec<Segment> = elf.segments()?;

        let mut min_addr: Addr = NOENTRY;
        let mut max_addr: Addr = 0;
        for segment in &segments {
            let paddr: Addr = segment.paddr;
            let file_end: u64 = u64::from(paddr) + u64::from(segment.filesz);
            let mem_end: u64 = u64::from(paddr) + u64::from(segment.memsz);
            if file_end > 1 << 32 || mem_end > 1 << 32 {
                let reason: String =
                    format!("segment at {:#010x} in \"{}\" overflows the address space",
                        paddr, filename);
                error!("insert_elf(): {}", reason);
                anyhow::bail!(reason);
            }

            if load {
                if segment.filesz > 0 {
                    self.insert(Section::new(
                        paddr,
                        (file_end - 1) as Addr,
                        SectionSource::Data {
                            img: img.clone(),
                            offset: segment.offset as usize,
                        },
                    )?)?;
                }
                if segment.memsz > segment.filesz {
                    self.insert(Section::new(
                        file_end as Addr,
                        (mem_end - 1) as Addr,
                        SectionSource::Zero,
                    )?)?;
                }
            } else {
                if segment.memsz == 0 {
                    let reason: String =
                        format!("empty section [{:#010x}-{:#010x}]", paddr, paddr);
                    error!("insert_elf(): {}", reason);
                    anyhow::bail!(reason);
                }
                self.insert(Section::new(
                    paddr,
                    (mem_end - 1) as Addr,
                    SectionSource::Reserved,
                )?)?;
            }

            if paddr < min_addr {
                min_addr = paddr;
            }
            // Every segment participates in the header bounds, even one that places nothing.
            let segment_last: Addr = (mem_end as Addr).wrapping_sub(1);
            if segment_last > max_addr {
                max_addr = segment_last;
            }
        }

        if load {
            self.add_header(min_addr, max_addr, entry);
        }
        Ok(())
    }

    ///
    /// # Description
    ///
    /// Resolves the entry point of the image. An explicit entry point wins; otherwise the first
    /// header record that carries an entry point provides it. The resolved entry point must fall
    /// inside a DATA section.
    ///
    /// # Returns
    ///
    /// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
    ///
    pub fn check_entry(&mut self) -> Result<()> {
        if self.entry == NOENTRY {
            self.entry = self
                .headers
                .iter()
                .find(|hdr| hdr.entry != NOENTRY)
                .map(|hdr| hdr.entry)
                .unwrap_or(NOENTRY);
        }
        if self.entry == NOENTRY {
            let reason: String = "no entry point has been specified".to_string();
            error!("check_entry(): {}", reason);
            anyhow::bail!(reason);
        }

        for section in &self.sections {
            if let SectionSource::Data { .. } = section.source {
                if section.first <= self.entry && self.entry <= section.last {
                    return Ok(());
                }
            }
        }

        let reason: String = format!(
            "entry point {:#x} is not loaded in any section",
            self.entry
        );
        error!("check_entry(): {}", reason);
        anyhow::bail!(reason);
    }

    ///
    /// # Description
    ///
    /// Logs a human-readable summary of the image.
    ///
    /// # Parameters
    ///
    /// - `name`: Name of the output file.
    ///
    pub fn log_summary(&self, name: &str) {
        info!(
            "memory image \"{}\": {} sections, {} headers, entry {:#010x}",
            name,
            self.sections.len(),
            self.headers.len(),
            self.entry
        );
        for (i, section) in self.sections.iter().enumerate() {
            debug!("section[{}]: {}", i, section);
        }
        for (i, hdr) in self.headers.iter().enumerate() {
            debug!(
                "header[{}]: [{:#010x}-{:#010x}], entry {:#010x}",
                i, hdr.min_addr, hdr.max_addr, hdr.entry
            );
        }
    }
}

impl Default for MemImage {
    fn default() -> Self {
        Self::new()
    }
}

//==================================================================================================
// Unit Tests
//==================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::fixtures::make_elf_le;
    use ::std::{
        env,
        path::PathBuf,
        process,
    };

    fn zero_section(first: Addr, last: Addr) -> Section {
        Section::new(first, last, SectionSource::Zero).unwrap()
    }

    /// Writes a little-endian ELF executable to a scratch file and returns its path. Segments
    /// are `(offset, paddr, filesz, memsz)` tuples.
    fn scratch_elf(name: &str, entry: Addr, segments: &[(u32, u32, u32, u32)]) -> String {
        let mut path: PathBuf = env::temp_dir();
        path.push(format!("mimg-image-test-{}-{}", process::id(), name));
        fs::write(&path, make_elf_le(entry, segments)).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn data_section(first: Addr, last: Addr) -> Section {
        let img: Rc<FileImage> = Rc::new(FileImage {
            filename: "payload".to_string(),
            contents: vec![0u8; (last - first + 1) as usize],
        });
        Section::new(first, last, SectionSource::Data { img, offset: 0 }).unwrap()
    }

    #[test]
    fn sections_are_kept_sorted() {
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0x3000, 0x3fff)).unwrap();
        mimg.insert(zero_section(0x1000, 0x1fff)).unwrap();
        mimg.insert(zero_section(0x2000, 0x2fff)).unwrap();

        let firsts: Vec<Addr> = mimg.sections().iter().map(|s| s.first).collect();
        assert_eq!(firsts, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn overlaps_are_rejected_in_any_order() {
        let ranges: [(Addr, Addr); 2] = [(0x1000, 0x1fff), (0x1800, 0x27ff)];
        for (a, b) in [(0usize, 1usize), (1, 0)] {
            let mut mimg: MemImage = MemImage::new();
            mimg.insert(zero_section(ranges[a].0, ranges[a].1)).unwrap();
            let err = mimg.insert(zero_section(ranges[b].0, ranges[b].1)).unwrap_err();
            assert!(err.to_string().starts_with("overlapping sections"));
        }

        // Touching ranges do not overlap.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0x1000, 0x1fff)).unwrap();
        mimg.insert(zero_section(0x2000, 0x2fff)).unwrap();
    }

    #[test]
    fn empty_sections_are_rejected() {
        assert!(Section::new(0x2000, 0x1fff, SectionSource::Zero).is_err());
    }

    #[test]
    fn cursor_survives_insertion_in_the_middle() {
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0x1000, 0x1fff)).unwrap();
        mimg.insert(zero_section(0x9000, 0x9fff)).unwrap();
        // Insert between the two existing sections: the cursor must follow.
        mimg.insert(zero_section(0x4000, 0x40ff)).unwrap();
        assert_eq!(mimg.next_addr(0, "x").unwrap(), 0x4100);
    }

    #[test]
    fn next_addr_honors_alignment() {
        let mut mimg: MemImage = MemImage::new();
        assert!(mimg.next_addr(0, "x").is_err());

        mimg.insert(zero_section(0x1000, 0x1234)).unwrap();
        assert_eq!(mimg.next_addr(0, "x").unwrap(), 0x1235);

        let page: Addr = mimg.next_addr(12, "x").unwrap();
        assert_eq!(page, 0x2000);
        assert_eq!(page & 0xfff, 0);
        assert!(page > 0x1234);

        // Page rounding from a page-aligned end still advances.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0x1000, 0x1fff)).unwrap();
        assert_eq!(mimg.next_addr(12, "x").unwrap(), 0x2000);

        // Rounding past the top of the address space fails.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0xffff_f000, 0xffff_ffff)).unwrap();
        assert!(mimg.next_addr(12, "x").is_err());
    }

    #[test]
    fn headers_keep_argument_order() {
        let mut mimg: MemImage = MemImage::new();
        mimg.add_header(0x9000, 0x9fff, NOENTRY);
        mimg.add_header(0x1000, 0x1fff, 0x1000);
        mimg.add_header(0x5000, 0x5fff, NOENTRY);

        let mins: Vec<Addr> = mimg.headers().iter().map(|h| h.min_addr).collect();
        assert_eq!(mins, vec![0x9000, 0x1000, 0x5000]);
    }

    #[test]
    fn elf_reserve_mode_claims_ranges_without_headers() {
        let path: String = scratch_elf("reserve.elf", 0x0010_0000, &[(0x80, 0x0010_0000, 16, 32)]);
        let mut mimg: MemImage = MemImage::new();
        mimg.insert_elf(&path, false).unwrap();
        fs::remove_file(&path).unwrap();

        // One RESERVED section spanning the whole segment, and no header record.
        assert_eq!(mimg.sections().len(), 1);
        assert_eq!(mimg.sections()[0].section_type(), SectionType::Reserved);
        assert_eq!(
            (mimg.sections()[0].first, mimg.sections()[0].last),
            (0x0010_0000, 0x0010_001f)
        );
        assert!(mimg.headers().is_empty());

        // The reserved range still fends off later placements.
        let err = mimg.insert(zero_section(0x0010_0010, 0x0010_002f)).unwrap_err();
        assert!(err.to_string().starts_with("overlapping sections"));
    }

    #[test]
    fn elf_reserve_mode_rejects_empty_segments() {
        let path: String = scratch_elf("reserve-empty.elf", 0, &[(0x80, 0x0010_0000, 0, 0)]);
        let mut mimg: MemImage = MemImage::new();
        let err = mimg.insert_elf(&path, false).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(err.to_string().starts_with("empty section"));
    }

    #[test]
    fn elf_load_mode_tracks_every_segment_in_the_header() {
        // The second segment has no file and no memory bytes: it places no section, but its
        // addresses still bound the per-module header record.
        let path: String = scratch_elf(
            "degenerate.elf",
            0x0010_0000,
            &[(0x80, 0x0010_0000, 16, 32), (0x90, 0x0020_0000, 0, 0)],
        );
        let mut mimg: MemImage = MemImage::new();
        mimg.insert_elf(&path, true).unwrap();
        fs::remove_file(&path).unwrap();

        // DATA section and BSS tail from the first segment only.
        assert_eq!(mimg.sections().len(), 2);

        assert_eq!(mimg.headers().len(), 1);
        let hdr: &ModuleHeader = &mimg.headers()[0];
        assert_eq!(hdr.min_addr, 0x0010_0000);
        assert_eq!(hdr.max_addr, 0x001f_ffff);
        assert_eq!(hdr.entry, 0x0010_0000);
    }

    #[test]
    fn entry_resolution() {
        // The first header with an entry point provides the default.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(data_section(0x1000, 0x1fff)).unwrap();
        mimg.add_header(0x9000, 0x9fff, NOENTRY);
        mimg.add_header(0x1000, 0x1fff, 0x1800);
        mimg.check_entry().unwrap();
        assert_eq!(mimg.entry(), 0x1800);

        // An explicit entry point wins over header records.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(data_section(0x1000, 0x1fff)).unwrap();
        mimg.add_header(0x1000, 0x1fff, 0x1800);
        mimg.set_entry(0x1004).unwrap();
        mimg.check_entry().unwrap();
        assert_eq!(mimg.entry(), 0x1004);

        // Conflicting explicit entry points are rejected; repeats are fine.
        let mut mimg: MemImage = MemImage::new();
        mimg.set_entry(0x1000).unwrap();
        mimg.set_entry(0x1000).unwrap();
        assert!(mimg.set_entry(0x2000).is_err());

        // No entry point at all.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(data_section(0x1000, 0x1fff)).unwrap();
        mimg.add_header(0x1000, 0x1fff, NOENTRY);
        assert!(mimg.check_entry().is_err());

        // Entry point outside every DATA section.
        let mut mimg: MemImage = MemImage::new();
        mimg.insert(zero_section(0x1000, 0x1fff)).unwrap();
        mimg.set_entry(0x1800).unwrap();
        let err = mimg.check_entry().unwrap_err();
        assert!(err.to_string().contains("is not loaded"));
    }
}
