// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Arguments
//!
//! This module provides utilities for parsing command-line arguments that were supplied to the
//! program. The builder takes the name of the output image file followed by a sequence of
//! placement arguments, each of which is applied to the image in order.
//!

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    config,
    format::Addr,
    image::{
        MemImage,
        Section,
        SectionSource,
    },
};
use ::anyhow::Result;
use ::std::env;

//==================================================================================================
// Public Structures
//==================================================================================================

///
/// # Description
///
/// This structure packs the command-line arguments that were passed to the program.
///
pub struct Args {
    /// Output image filename.
    output: String,
    /// Placement arguments, in order.
    placements: Vec<String>,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl Args {
    ///
    /// # Description
    ///
    /// Parses the command-line arguments that were passed to the program.
    ///
    /// # Parameters
    ///
    /// - `args`: Command-line arguments.
    ///
    /// # Returns
    ///
    /// Upon successful completion, this method returns the command-line arguments that were
    /// passed to the program. Otherwise, it returns an error.
    ///
    pub fn parse(args: Vec<String>) -> Result<Self> {
        trace!("parse(): args={:?}", args);

        if args.len() < 2 {
            Self::usage();
            let reason: String = "no output image file specified".to_string();
            error!("parse(): {}", reason);
            anyhow::bail!(reason);
        }

        Ok(Self {
            output: args[1].clone(),
            placements: args[2..].to_vec(),
        })
    }

    ///
    /// # Description
    ///
    /// Prints program usage.
    ///
    pub fn usage() {
        eprintln!(
            "Usage: {} imagefile [arg ...]",
            env::args().next().unwrap_or(config::PROGRAM_NAME.to_string())
        );
        eprintln!("where each arg is one of the following:");
        eprintln!("  file               load ELF file");
        eprintln!("  noload:file        reserve ELF file");
        eprintln!("  zero:addr-addr     zero all addresses in specified range");
        eprintln!("  bootdata:addr-addr store bootdata in specified range");
        eprintln!("  reserved:addr-addr reserve all addresses in specified range");
        eprintln!("  entry@addr         set explicit entry point");
        eprintln!("  file@addr          load file at given address");
        eprintln!("  file@next          load file at next address");
        eprintln!("  file@page          load file at next page boundary");
    }

    /// Returns the output image filename.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Returns the placement arguments, in order.
    pub fn placements(&self) -> &[String] {
        &self.placements
    }
}

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Parses and applies a single placement argument to a memory image. The argument takes one of
/// the forms listed by [`Args::usage`].
///
/// # Parameters
///
/// - `mimg`: Memory image under construction.
/// - `arg`: Placement argument.
///
/// # Returns
///
/// Upon successful completion, empty is returned. Otherwise, an error is returned instead.
///
pub fn apply(mimg: &mut MemImage, arg: &str) -> Result<()> {
    trace!("apply(): {}", arg);

    let separator: Option<usize> = arg.find(|ch| ch == ':' || ch == '@');
    match separator {
        // Plain filename: load an ELF file.
        None => mimg.insert_elf(arg, true),

        // name@spec: place a raw file, or set the entry point.
        Some(i) if arg.as_bytes()[i] == b'@' => {
            let name: &str = &arg[..i];
            let spec: &str = &arg[i + 1..];

            let addr: Addr = match spec {
                "next" => mimg.next_addr(0, arg)?,
                "page" => mimg.next_addr(config::PAGE_SHIFT, arg)?,
                _ => {
                    let (addr, rest): (Addr, &str) = read_addr(arg, spec)?;
                    if !rest.is_empty() {
                        let reason: String =
                            format!("junk after address in argument \"{}\"", arg);
                        error!("apply(): {}", reason);
                        anyhow::bail!(reason);
                    }
                    addr
                },
            };

            if name == "entry" {
                mimg.set_entry(addr)
            } else {
                mimg.insert_file(name, addr)
            }
        },

        // keyword:rest: reserve an ELF file, or place a special section over a range.
        Some(i) => {
            let keyword: &str = &arg[..i];
            let rest: &str = &arg[i + 1..];

            if keyword == "noload" {
                return mimg.insert_elf(rest, false);
            }

            let (first, last): (Addr, Addr) = read_range(arg, rest)?;
            match keyword {
                "zero" => {
                    mimg.insert(Section::new(first, last, SectionSource::Zero)?)?;
                },
                "bootdata" => {
                    mimg.insert(Section::new(first, last, SectionSource::BootData)?)?;
                },
                "reserved" => {
                    mimg.insert(Section::new(first, last, SectionSource::Reserved)?)?;
                },
                _ => {
                    let reason: String = format!("unrecognized argument \"{}\"", arg);
                    error!("apply(): {}", reason);
                    anyhow::bail!(reason);
                },
            }
            mimg.add_header(first, last, crate::format::NOENTRY);
            Ok(())
        },
    }
}

///
/// # Description
///
/// Reads a hexadecimal address, with an optional `0x` or `0X` prefix, from the front of a string.
///
/// # Parameters
///
/// - `arg`: Argument being processed, for diagnostics.
/// - `s`: String to read from.
///
/// # Returns
///
/// Upon successful completion, the address and the unread remainder of the string are returned.
/// Otherwise, an error is returned instead.
///
fn read_addr<'a>(arg: &str, s: &'a str) -> Result<(Addr, &'a str)> {
    let s: &str = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(stripped) => stripped,
        None => s,
    };

    let mut addr: Addr = 0;
    let mut digits: usize = 0;
    for ch in s.chars() {
        let digit: u32 = match ch.to_digit(16) {
            Some(digit) => digit,
            None => break,
        };
        // A value that already occupies the top nibble cannot take another digit.
        if addr >> 28 != 0 {
            let reason: String = format!("address overflow in argument \"{}\"", arg);
            error!("read_addr(): {}", reason);
            anyhow::bail!(reason);
        }
        addr = (addr << 4) | digit;
        digits += 1;
    }

    if digits == 0 {
        let reason: String = format!("missing address in argument \"{}\"", arg);
        error!("read_addr(): {}", reason);
        anyhow::bail!(reason);
    }

    Ok((addr, &s[digits..]))
}

///
/// # Description
///
/// Reads an `addr-addr` range from a string. A single trailing semicolon is tolerated; any other
/// trailing text is an error.
///
/// # Parameters
///
/// - `arg`: Argument being processed, for diagnostics.
/// - `s`: String to read from.
///
/// # Returns
///
/// Upon successful completion, the first and last addresses of the range are returned.
/// Otherwise, an error is returned instead.
///
fn read_range(arg: &str, s: &str) -> Result<(Addr, Addr)> {
    let (first, rest): (Addr, &str) = read_addr(arg, s)?;

    let rest: &str = match rest.strip_prefix('-') {
        Some(rest) => rest,
        None => {
            let reason: String = format!("missing range in argument \"{}\"", arg);
            error!("read_range(): {}", reason);
            anyhow::bail!(reason);
        },
    };

    let (last, rest): (Addr, &str) = read_addr(arg, rest)?;
    if !rest.is_empty() && rest != ";" {
        let reason: String = format!("junk after range in argument \"{}\"", arg);
        error!("read_range(): {}", reason);
        anyhow::bail!(reason);
    }

    if first > last {
        let reason: String = format!("illegal range in argument \"{}\"", arg);
        error!("read_range(): {}", reason);
        anyhow::bail!(reason);
    }

    Ok((first, last))
}

//==================================================================================================
// Unit Tests
//==================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        elf::fixtures::make_elf_le,
        format::{
            SectionType,
            NOENTRY,
        },
    };
    use ::std::{
        fs,
        path::PathBuf,
        process,
    };

    #[test]
    fn addresses_parse_with_and_without_prefix() {
        assert_eq!(read_addr("x", "1000").unwrap(), (0x1000, ""));
        assert_eq!(read_addr("x", "0x1000").unwrap(), (0x1000, ""));
        assert_eq!(read_addr("x", "0XdeadBEEF").unwrap(), (0xdead_beef, ""));
        assert_eq!(read_addr("x", "10-20").unwrap(), (0x10, "-20"));
        assert_eq!(read_addr("x", "00000000001").unwrap(), (1, ""));
    }

    #[test]
    fn address_errors() {
        let err = read_addr("a@", "").unwrap_err();
        assert!(err.to_string().starts_with("missing address"));

        let err = read_addr("a@zz", "zz").unwrap_err();
        assert!(err.to_string().starts_with("missing address"));

        let err = read_addr("a@100000000", "100000000").unwrap_err();
        assert!(err.to_string().starts_with("address overflow"));
    }

    #[test]
    fn range_arguments_build_sections() {
        let mut mimg: MemImage = MemImage::new();
        apply(&mut mimg, "zero:0x1000-0x1fff").unwrap();
        apply(&mut mimg, "bootdata:0x2000-0x2fff;").unwrap();
        apply(&mut mimg, "reserved:3000-3fff").unwrap();

        let kinds: Vec<SectionType> =
            mimg.sections().iter().map(|s| s.section_type()).collect();
        assert_eq!(
            kinds,
            vec![SectionType::Zero, SectionType::BootData, SectionType::Reserved]
        );

        // Each range argument registers a header record without an entry point.
        assert_eq!(mimg.headers().len(), 3);
        assert!(mimg.headers().iter().all(|h| h.entry == NOENTRY));
    }

    #[test]
    fn range_errors() {
        let mut mimg: MemImage = MemImage::new();

        let err = apply(&mut mimg, "zero:0x1000").unwrap_err();
        assert!(err.to_string().starts_with("missing range"));

        let err = apply(&mut mimg, "zero:0x1000-0x1fffx").unwrap_err();
        assert!(err.to_string().starts_with("junk after range"));

        let err = apply(&mut mimg, "zero:0x2000-0x1000").unwrap_err();
        assert!(err.to_string().starts_with("illegal range"));

        let err = apply(&mut mimg, "fill:0x1000-0x1fff").unwrap_err();
        assert!(err.to_string().starts_with("unrecognized argument"));
    }

    #[test]
    fn noload_reserves_an_elf() {
        let mut path: PathBuf = env::temp_dir();
        path.push(format!("mimg-args-test-{}-noload.elf", process::id()));
        fs::write(&path, make_elf_le(0x0010_0000, &[(0x80, 0x0010_0000, 16, 32)])).unwrap();

        let mut mimg: MemImage = MemImage::new();
        apply(&mut mimg, &format!("noload:{}", path.to_str().unwrap())).unwrap();
        fs::remove_file(&path).unwrap();

        // The segment is claimed as a RESERVED section, with no header record.
        assert_eq!(mimg.sections().len(), 1);
        assert_eq!(mimg.sections()[0].section_type(), SectionType::Reserved);
        assert_eq!(
            (mimg.sections()[0].first, mimg.sections()[0].last),
            (0x0010_0000, 0x0010_001f)
        );
        assert!(mimg.headers().is_empty());
    }

    #[test]
    fn explicit_entry_points() {
        let mut mimg: MemImage = MemImage::new();
        apply(&mut mimg, "entry@0x100100").unwrap();
        assert_eq!(mimg.entry(), 0x0010_0100);

        // Restating the same entry point is fine; a conflicting one is not.
        apply(&mut mimg, "entry@0x100100").unwrap();
        let err = apply(&mut mimg, "entry@0x100200").unwrap_err();
        assert!(err.to_string().starts_with("multiple entry points"));

        let err = apply(&mut mimg, "entry@0x100100x").unwrap_err();
        assert!(err.to_string().starts_with("junk after address"));
    }

    #[test]
    fn relative_placement_requires_a_previous_section() {
        let mut mimg: MemImage = MemImage::new();
        let err = apply(&mut mimg, "entry@next").unwrap_err();
        assert!(err.to_string().starts_with("no previous loaded section"));

        apply(&mut mimg, "zero:0x1000-0x1233").unwrap();
        apply(&mut mimg, "entry@next").unwrap();
        assert_eq!(mimg.entry(), 0x1234);
    }

    #[test]
    fn page_placement_rounds_up() {
        let mut mimg: MemImage = MemImage::new();
        apply(&mut mimg, "zero:0x1000-0x1233").unwrap();
        apply(&mut mimg, "entry@page").unwrap();
        assert_eq!(mimg.entry(), 0x2000);
    }
}
