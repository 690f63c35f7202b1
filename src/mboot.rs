// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Multiboot Adapter
//!
//! This module normalizes the information handed over by a multiboot-compliant bootstrap into the
//! values that the loader needs: a memory map of available physical regions, the location of the
//! single boot module that carries the memory image, and the addresses of the boot command
//! strings. All multiboot structures are read through the loader's memory view.
//!

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    error::BootError,
    format::Addr,
    memory::Memory,
};

//==================================================================================================
// Constants
//==================================================================================================

/// Magic value that a multiboot-compliant bootstrap leaves in the magic register.
pub const MBI_MAGIC: u32 = 0x2bad_b002;

// Flags in the multiboot information structure.
const MBI_MEM_VALID: u32 = 1 << 0; // Memory bounds are valid.
const MBI_CMD_VALID: u32 = 1 << 2; // Command line is valid.
const MBI_MODS_VALID: u32 = 1 << 3; // Module list is valid.
const MBI_MMAP_VALID: u32 = 1 << 6; // Memory map is valid.

// Field offsets in the multiboot information structure.
const MBI_FLAGS: u32 = 0; // Flags.
const MBI_MEM_LOWER: u32 = 4; // Kibibytes of memory below 1 MiB.
const MBI_MEM_UPPER: u32 = 8; // Kibibytes of memory above 1 MiB.
const MBI_CMDLINE: u32 = 16; // Address of the boot command line.
const MBI_MODS_COUNT: u32 = 20; // Number of boot modules.
const MBI_MODS_ADDR: u32 = 24; // Address of the module list.
const MBI_MMAP_LENGTH: u32 = 44; // Length of the memory map buffer.
const MBI_MMAP_ADDR: u32 = 48; // Address of the memory map buffer.

// Field offsets in a module record.
const MOD_START: u32 = 0; // Address of the first module byte.
const MOD_END: u32 = 4; // Address after the last module byte.
const MOD_STRING: u32 = 8; // Address of the module command string.

// Field offsets in a memory map entry. The size field precedes the entry proper: the next entry
// lives at `size + 4` bytes from the current one.
const MMAP_SIZE: u32 = 0; // Size of the entry, excluding this field.
const MMAP_BASE_LO: u32 = 4; // Low word of the base address.
const MMAP_BASE_HI: u32 = 8; // High word of the base address.
const MMAP_LEN_LO: u32 = 12; // Low word of the region length.
const MMAP_LEN_HI: u32 = 16; // High word of the region length.
const MMAP_TYPE: u32 = 20; // Region type.

/// Smallest readable memory map entry.
const MMAP_ENTRY_LEN: u32 = 24;

/// Region type that marks available memory.
const MMAP_AVAILABLE: u32 = 1;

/// Base address of upper memory.
const UPPER_MEMORY_BASE: u32 = 0x0010_0000;

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// An available region of physical memory, as a closed address range.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First address of the region.
    pub first: Addr,
    /// Last address of the region.
    pub last: Addr,
}

///
/// # Description
///
/// A normalized view of the physical memory map. When the bootstrap supplies a memory map buffer
/// it is walked in place; when it supplies only memory bounds, a two-region map is synthesized
/// from them.
///
#[derive(Debug)]
pub enum MemoryMap {
    /// Memory map buffer supplied by the bootstrap.
    Table {
        /// Address of the buffer.
        addr: Addr,
        /// Length of the buffer in bytes.
        length: u32,
    },
    /// Memory map synthesized from the lower and upper memory bounds.
    Synthesized {
        /// Available regions.
        regions: [Region; 2],
        /// Number of valid entries in `regions`.
        count: usize,
    },
}

///
/// # Description
///
/// The boot environment that the loader works against: the memory map, the location of the boot
/// module, and the boot command strings.
///
#[derive(Debug)]
pub struct BootEnv {
    /// Normalized memory map.
    pub mmap: MemoryMap,
    /// Address of the first byte of the boot module.
    pub module_start: Addr,
    /// Address of the last byte of the boot module.
    pub module_finish: Addr,
    /// Address of the boot command line, if any.
    pub cmdline: Option<Addr>,
    /// Address of the module command string, if any.
    pub imgline: Option<Addr>,
}

//==================================================================================================
// Implementations
//==================================================================================================

impl MemoryMap {
    ///
    /// # Description
    ///
    /// Checks whether the closed range `[first, last]` lies entirely inside one available region.
    ///
    /// # Parameters
    ///
    /// - `mem`: Memory view that holds the memory map buffer.
    /// - `first`: First address of the range.
    /// - `last`: Last address of the range.
    ///
    /// # Returns
    ///
    /// `true` if the range is backed by available memory, `false` otherwise.
    ///
    pub fn fits(&self, mem: &Memory, first: Addr, last: Addr) -> bool {
        match self {
            MemoryMap::Table { addr, length } => {
                let mut cursor: u64 = u64::from(*addr);
                let limit: u64 = table_limit(*addr, *length);
                while cursor + u64::from(MMAP_ENTRY_LEN) <= limit {
                    if let Some(region) = read_entry(mem, cursor as Addr) {
                        if region.first <= first && last <= region.last {
                            return true;
                        }
                    }
                    cursor += entry_stride(mem, cursor as Addr);
                }
                false
            },
            MemoryMap::Synthesized { regions, count } => regions[..*count]
                .iter()
                .any(|region| region.first <= first && last <= region.last),
        }
    }

    ///
    /// # Description
    ///
    /// Writes the memory map into the closed range `[first, last]` in boot-data form: a count
    /// word followed by `(first, last)` address pairs, one per available region. Entries that do
    /// not fit are dropped; when there is no room even for the count word, nothing is written.
    ///
    /// # Parameters
    ///
    /// - `mem`: Memory view to write through.
    /// - `first`: First address of the destination range.
    /// - `last`: Last address of the destination range.
    ///
    /// # Returns
    ///
    /// The address of the first byte after the written map, or `first` when nothing was written.
    ///
    pub fn copy_to(&self, mem: &mut Memory, first: Addr, last: Addr) -> Addr {
        if first > last || u64::from(last) - u64::from(first) + 1 < 4 {
            return first;
        }
        let room: u64 = (u64::from(last) - u64::from(first) + 1 - 4) / 8;

        let mut written: u32 = 0;
        match self {
            MemoryMap::Table { addr, length } => {
                let mut cursor: u64 = u64::from(*addr);
                let limit: u64 = table_limit(*addr, *length);
                while u64::from(written) < room && cursor + u64::from(MMAP_ENTRY_LEN) <= limit {
                    if let Some(region) = read_entry(mem, cursor as Addr) {
                        mem.write_u32(first + 4 + 8 * written, region.first);
                        mem.write_u32(first + 8 + 8 * written, region.last);
                        written += 1;
                    }
                    cursor += entry_stride(mem, cursor as Addr);
                }
            },
            MemoryMap::Synthesized { regions, count } => {
                for region in &regions[..*count] {
                    if u64::from(written) >= room {
                        break;
                    }
                    mem.write_u32(first + 4 + 8 * written, region.first);
                    mem.write_u32(first + 8 + 8 * written, region.last);
                    written += 1;
                }
            },
        }

        mem.write_u32(first, written);
        first + 4 + 8 * written
    }
}

//==================================================================================================
// Standalone Functions
//==================================================================================================

/// End of the memory map buffer, clamped to the 32-bit address space.
fn table_limit(addr: Addr, length: u32) -> u64 {
    (u64::from(addr) + u64::from(length)).min(1 << 32)
}

/// Number of bytes from a memory map entry to the next one. Never zero.
fn entry_stride(mem: &Memory, entry: Addr) -> u64 {
    let stride: u64 = u64::from(mem.read_u32(entry + MMAP_SIZE)) + 4;
    if stride > 4 {
        stride
    } else {
        u64::from(MMAP_ENTRY_LEN)
    }
}

///
/// # Description
///
/// Reads a memory map entry and decides whether it describes an available range of physical
/// 32-bit addresses. An entry qualifies when its type marks available memory, the high words of
/// its base and length are zero, and the range does not overflow the 32-bit address space.
///
/// # Parameters
///
/// - `mem`: Memory view that holds the memory map buffer.
/// - `entry`: Address of the entry.
///
/// # Returns
///
/// The region that the entry describes, or `None` when the entry is not usable.
///
fn read_entry(mem: &Memory, entry: Addr) -> Option<Region> {
    let base_lo: u32 = mem.read_u32(entry + MMAP_BASE_LO);
    let base_hi: u32 = mem.read_u32(entry + MMAP_BASE_HI);
    let len_lo: u32 = mem.read_u32(entry + MMAP_LEN_LO);
    let len_hi: u32 = mem.read_u32(entry + MMAP_LEN_HI);
    let entry_type: u32 = mem.read_u32(entry + MMAP_TYPE);

    if entry_type != MMAP_AVAILABLE || base_hi != 0 || len_hi != 0 || len_lo == 0 {
        return None;
    }
    let last: u64 = u64::from(base_lo) + u64::from(len_lo) - 1;
    if last > u64::from(Addr::MAX) {
        return None;
    }

    Some(Region {
        first: base_lo,
        last: last as Addr,
    })
}

///
/// # Description
///
/// Normalizes the multiboot information structure into a boot environment.
///
/// # Parameters
///
/// - `mem`: Memory view that holds the multiboot structures.
/// - `magic`: Value of the multiboot magic register.
/// - `mbi`: Address of the multiboot information structure.
///
/// # Returns
///
/// Upon successful completion, the boot environment is returned. Otherwise, an error is returned
/// instead.
///
pub fn boot_env(mem: &Memory, magic: u32, mbi: Addr) -> Result<BootEnv, BootError> {
    if magic != MBI_MAGIC {
        return Err(BootError::InvalidMultibootMagic);
    }

    let flags: u32 = mem.read_u32(mbi + MBI_FLAGS);

    let mmap: MemoryMap = if flags & MBI_MMAP_VALID != 0 {
        MemoryMap::Table {
            addr: mem.read_u32(mbi + MBI_MMAP_ADDR),
            length: mem.read_u32(mbi + MBI_MMAP_LENGTH),
        }
    } else if flags & MBI_MEM_VALID != 0 {
        synthesize_mmap(
            mem.read_u32(mbi + MBI_MEM_LOWER),
            mem.read_u32(mbi + MBI_MEM_UPPER),
        )
    } else {
        return Err(BootError::NoMemoryMap);
    };

    if flags & MBI_MODS_VALID == 0 {
        return Err(BootError::NoModuleList);
    }
    let mods_count: u32 = mem.read_u32(mbi + MBI_MODS_COUNT);
    if mods_count < 1 {
        return Err(BootError::NoModules);
    }
    if mods_count > 1 {
        return Err(BootError::MultipleModules);
    }

    let module: Addr = mem.read_u32(mbi + MBI_MODS_ADDR);
    let module_start: Addr = mem.read_u32(module + MOD_START);
    let module_finish: Addr = mem.read_u32(module + MOD_END).wrapping_sub(1);
    let imgline: Addr = mem.read_u32(module + MOD_STRING);

    let cmdline: Option<Addr> = if flags & MBI_CMD_VALID != 0 {
        match mem.read_u32(mbi + MBI_CMDLINE) {
            0 => None,
            addr => Some(addr),
        }
    } else {
        None
    };

    Ok(BootEnv {
        mmap,
        module_start,
        module_finish,
        cmdline,
        imgline: if imgline == 0 { None } else { Some(imgline) },
    })
}

///
/// # Description
///
/// Synthesizes a memory map from the lower and upper memory bounds: one region for conventional
/// memory below 640 KiB, one for extended memory above 1 MiB. Empty regions are dropped, and the
/// upper region saturates at the top of the 32-bit address space.
///
/// # Parameters
///
/// - `mem_lower`: Kibibytes of memory below 1 MiB.
/// - `mem_upper`: Kibibytes of memory above 1 MiB.
///
/// # Returns
///
/// The synthesized memory map.
///
fn synthesize_mmap(mem_lower: u32, mem_upper: u32) -> MemoryMap {
    let mut regions: [Region; 2] = [Region { first: 0, last: 0 }; 2];
    let mut count: usize = 0;

    if mem_lower > 0 {
        let last: u64 = u64::from(mem_lower) * 1024 - 1;
        regions[count] = Region {
            first: 0,
            last: last.min(u64::from(Addr::MAX)) as Addr,
        };
        count += 1;
    }
    if mem_upper > 0 {
        let last: u64 = u64::from(UPPER_MEMORY_BASE) + u64::from(mem_upper) * 1024 - 1;
        regions[count] = Region {
            first: UPPER_MEMORY_BASE,
            last: last.min(u64::from(Addr::MAX)) as Addr,
        };
        count += 1;
    }

    MemoryMap::Synthesized { regions, count }
}

//==================================================================================================
// Unit Tests
//==================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes a memory map entry at `at` and returns the address after it.
    fn put_entry(
        mem: &mut Memory,
        at: Addr,
        base: u32,
        len: u32,
        entry_type: u32,
    ) -> Addr {
        mem.write_u32(at + MMAP_SIZE, 20);
        mem.write_u32(at + MMAP_BASE_LO, base);
        mem.write_u32(at + MMAP_BASE_HI, 0);
        mem.write_u32(at + MMAP_LEN_LO, len);
        mem.write_u32(at + MMAP_LEN_HI, 0);
        mem.write_u32(at + MMAP_TYPE, entry_type);
        at + MMAP_ENTRY_LEN
    }

    #[test]
    fn table_map_honors_entry_types() {
        let mut bytes: Vec<u8> = vec![0; 0x1000];
        let mut mem: Memory = Memory::new(0, &mut bytes);
        let end: Addr = put_entry(&mut mem, 0x100, 0x1000, 0x1000, MMAP_AVAILABLE);
        let end: Addr = put_entry(&mut mem, end, 0x8000, 0x1000, 2); // reserved
        put_entry(&mut mem, end, 0x10000, 0x1000, MMAP_AVAILABLE);

        let mmap: MemoryMap = MemoryMap::Table {
            addr: 0x100,
            length: 3 * MMAP_ENTRY_LEN,
        };
        assert!(mmap.fits(&mem, 0x1000, 0x1fff));
        assert!(mmap.fits(&mem, 0x10800, 0x10fff));
        // Reserved entries do not back sections, even though they are in the table.
        assert!(!mmap.fits(&mem, 0x8000, 0x80ff));
        // Ranges spanning beyond a region do not fit.
        assert!(!mmap.fits(&mem, 0x1800, 0x2800));
    }

    #[test]
    fn copy_to_emits_count_and_pairs() {
        let mut bytes: Vec<u8> = vec![0; 0x1000];
        let mut mem: Memory = Memory::new(0, &mut bytes);
        let end: Addr = put_entry(&mut mem, 0x100, 0x0, 0xa0000, MMAP_AVAILABLE);
        let end: Addr = put_entry(&mut mem, end, 0xf0000, 0x10000, 2);
        put_entry(&mut mem, end, 0x100000, 0x100000, MMAP_AVAILABLE);

        let mmap: MemoryMap = MemoryMap::Table {
            addr: 0x100,
            length: 3 * MMAP_ENTRY_LEN,
        };
        let next: Addr = mmap.copy_to(&mut mem, 0x800, 0x8ff);
        assert_eq!(next, 0x800 + 4 + 2 * 8);
        assert_eq!(mem.read_u32(0x800), 2);
        assert_eq!(mem.read_u32(0x804), 0);
        assert_eq!(mem.read_u32(0x808), 0x9ffff);
        assert_eq!(mem.read_u32(0x80c), 0x100000);
        assert_eq!(mem.read_u32(0x810), 0x1fffff);
    }

    #[test]
    fn copy_to_respects_tight_destinations() {
        let mut bytes: Vec<u8> = vec![0; 0x1000];
        let mut mem: Memory = Memory::new(0, &mut bytes);
        put_entry(&mut mem, 0x100, 0x0, 0xa0000, MMAP_AVAILABLE);
        let mmap: MemoryMap = MemoryMap::Table {
            addr: 0x100,
            length: MMAP_ENTRY_LEN,
        };

        // No room even for the count word: nothing is written.
        assert_eq!(mmap.copy_to(&mut mem, 0x800, 0x802), 0x800);

        // Room for the count word, but not for any pair.
        let next: Addr = mmap.copy_to(&mut mem, 0x800, 0x80a);
        assert_eq!(next, 0x804);
        assert_eq!(mem.read_u32(0x800), 0);
    }

    #[test]
    fn synthesized_map_covers_both_regions() {
        let mmap: MemoryMap = synthesize_mmap(640, 1024);
        let mut bytes: Vec<u8> = vec![0; 16];
        let mem: Memory = Memory::new(0, &mut bytes);
        assert!(mmap.fits(&mem, 0, 0x9ffff));
        assert!(mmap.fits(&mem, 0x100000, 0x1fffff));
        assert!(!mmap.fits(&mem, 0xa0000, 0xfffff));

        // Zero bounds synthesize an empty map.
        if let MemoryMap::Synthesized { count, .. } = synthesize_mmap(0, 0) {
            assert_eq!(count, 0);
        } else {
            panic!("expected a synthesized map");
        }
    }

    #[test]
    fn boot_env_rejects_bad_environments() {
        let mut bytes: Vec<u8> = vec![0; 0x1000];
        let mut mem: Memory = Memory::new(0, &mut bytes);

        assert_eq!(
            boot_env(&mem, 0xdead_beef, 0x100).unwrap_err(),
            BootError::InvalidMultibootMagic
        );

        // No memory information at all.
        assert_eq!(
            boot_env(&mem, MBI_MAGIC, 0x100).unwrap_err(),
            BootError::NoMemoryMap
        );

        // Memory bounds, but no module list.
        mem.write_u32(0x100 + MBI_FLAGS, MBI_MEM_VALID);
        mem.write_u32(0x100 + MBI_MEM_LOWER, 640);
        mem.write_u32(0x100 + MBI_MEM_UPPER, 1024);
        assert_eq!(
            boot_env(&mem, MBI_MAGIC, 0x100).unwrap_err(),
            BootError::NoModuleList
        );

        // Module list with no modules.
        mem.write_u32(0x100 + MBI_FLAGS, MBI_MEM_VALID | MBI_MODS_VALID);
        mem.write_u32(0x100 + MBI_MODS_COUNT, 0);
        assert_eq!(
            boot_env(&mem, MBI_MAGIC, 0x100).unwrap_err(),
            BootError::NoModules
        );

        // Too many modules.
        mem.write_u32(0x100 + MBI_MODS_COUNT, 2);
        assert_eq!(
            boot_env(&mem, MBI_MAGIC, 0x100).unwrap_err(),
            BootError::MultipleModules
        );
    }

    #[test]
    fn boot_env_locates_the_module() {
        let mut bytes: Vec<u8> = vec![0; 0x1000];
        let mut mem: Memory = Memory::new(0, &mut bytes);

        mem.write_u32(0x100 + MBI_FLAGS, MBI_MEM_VALID | MBI_MODS_VALID | MBI_CMD_VALID);
        mem.write_u32(0x100 + MBI_MEM_LOWER, 640);
        mem.write_u32(0x100 + MBI_MEM_UPPER, 1024);
        mem.write_u32(0x100 + MBI_CMDLINE, 0x300);
        mem.write_u32(0x100 + MBI_MODS_COUNT, 1);
        mem.write_u32(0x100 + MBI_MODS_ADDR, 0x200);
        mem.write_u32(0x200 + MOD_START, 0x800);
        mem.write_u32(0x200 + MOD_END, 0x900);
        mem.write_u32(0x200 + MOD_STRING, 0x310);

        let env: BootEnv = boot_env(&mem, MBI_MAGIC, 0x100).unwrap();
        assert_eq!(env.module_start, 0x800);
        assert_eq!(env.module_finish, 0x8ff);
        assert_eq!(env.cmdline, Some(0x300));
        assert_eq!(env.imgline, Some(0x310));
    }
}
