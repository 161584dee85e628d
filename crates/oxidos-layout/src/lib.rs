//! Fixed on-disk and in-file record layouts.
//!
//! Everything here is a plain-old-data struct with an exactly known byte
//! width, so the kernel and the host tools (`oxidos-mkfs`, `oxidos-cli`)
//! agree on what a disk image contains. All fields are little-endian.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

/// Size of a disk sector in bytes.
pub const SECTOR_SIZE: usize = 128;

/// Number of sectors on the simulated disk.
pub const NUM_SECTORS: usize = 1024;

/// Sector holding the free-map file header. Fixed so it can be found on boot.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the root directory file header. Fixed, never reallocated.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Maximum length of one path component, in bytes.
pub const NAME_MAX: usize = 32;

/// Direct data-sector slots in a file header. Sized so the header is
/// exactly one sector: 2 * 4 bytes of metadata + NUM_DIRECT * 4 bytes.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * 4) / 4;

/// Largest file the header layout can describe.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * SECTOR_SIZE;

/// Byte length of the free-map file (one bit per sector).
pub const FREE_MAP_FILE_SIZE: usize = NUM_SECTORS / 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("name longer than {NAME_MAX} bytes")]
    NameTooLong,

    #[error("name is not valid UTF-8")]
    BadName,

    #[error("bad executable magic: {0:#x}")]
    BadMagic(u32),

    #[error("record truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// On-disk file header. Lives alone in its sector; gives the byte length of
/// the file and the ordered list of data sectors backing it.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct RawFileHeader {
    pub bytes: u32,
    pub sectors: u32,
    pub data: [u32; NUM_DIRECT],
}

impl RawFileHeader {
    pub fn empty() -> Self {
        Self::zeroed()
    }

    pub fn from_sector(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < SECTOR_SIZE {
            return Err(LayoutError::Truncated {
                expected: SECTOR_SIZE,
                got: buf.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&buf[..SECTOR_SIZE]))
    }

    pub fn to_sector(&self) -> [u8; SECTOR_SIZE] {
        let mut out = [0u8; SECTOR_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(self));
        out
    }
}

/// One entry of an on-disk directory record: the named child and the sector
/// of its file header. `is_dir` is a u32 so the struct stays `Pod` with no
/// padding; any nonzero value means "directory".
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct RawDirEntry {
    pub sector: u32,
    pub is_dir: u32,
    pub name: [u8; NAME_MAX],
}

/// Byte width of one directory entry on disk.
pub const DIR_ENTRY_SIZE: usize = core::mem::size_of::<RawDirEntry>();

impl RawDirEntry {
    pub fn new(sector: u32, is_dir: bool, name_str: &str) -> Result<Self, LayoutError> {
        let bytes = name_str.as_bytes();
        if bytes.len() > NAME_MAX {
            return Err(LayoutError::NameTooLong);
        }
        let mut name = [0u8; NAME_MAX];
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            sector,
            is_dir: is_dir as u32,
            name,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    pub fn name_as_str(&self) -> Result<&str, LayoutError> {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..end]).map_err(|_| LayoutError::BadName)
    }
}

/// Magic number at the start of an executable container.
pub const EXEC_MAGIC: u32 = 0x00BA_DFAD;

/// One segment descriptor of the executable container: where the segment
/// lands in the user address space, where its bytes sit in the file, and
/// how many bytes it has.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ExecSegment {
    pub virtual_addr: u32,
    pub in_file_addr: u32,
    pub size: u32,
}

/// Header of the executable container consumed by the loader: a magic
/// number followed by code, initialized-data and uninitialized-data
/// segment descriptors.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ExecHeader {
    pub magic: u32,
    pub code: ExecSegment,
    pub init_data: ExecSegment,
    pub uninit_data: ExecSegment,
}

/// Byte width of the executable header at the start of the file.
pub const EXEC_HEADER_SIZE: usize = core::mem::size_of::<ExecHeader>();

impl ExecHeader {
    /// Parse the header from the first bytes of an executable, normalizing
    /// byte order: containers produced on the other endianness carry every
    /// field swapped, which the magic number reveals.
    pub fn parse(buf: &[u8]) -> Result<Self, LayoutError> {
        if buf.len() < EXEC_HEADER_SIZE {
            return Err(LayoutError::Truncated {
                expected: EXEC_HEADER_SIZE,
                got: buf.len(),
            });
        }
        let mut header: ExecHeader = bytemuck::pod_read_unaligned(&buf[..EXEC_HEADER_SIZE]);
        if header.magic == EXEC_MAGIC {
            return Ok(header);
        }
        if header.magic.swap_bytes() == EXEC_MAGIC {
            header.swap_all();
            return Ok(header);
        }
        Err(LayoutError::BadMagic(header.magic))
    }

    fn swap_all(&mut self) {
        self.magic = self.magic.swap_bytes();
        for seg in [&mut self.code, &mut self.init_data, &mut self.uninit_data] {
            seg.virtual_addr = seg.virtual_addr.swap_bytes();
            seg.in_file_addr = seg.in_file_addr.swap_bytes();
            seg.size = seg.size.swap_bytes();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_is_one_sector() {
        assert_eq!(core::mem::size_of::<RawFileHeader>(), SECTOR_SIZE);
    }

    #[test]
    fn file_header_round_trip() {
        let mut header = RawFileHeader::empty();
        header.bytes = 300;
        header.sectors = 3;
        header.data[0] = 7;
        header.data[1] = 9;
        header.data[2] = 4;

        let sector = header.to_sector();
        let back = RawFileHeader::from_sector(&sector).unwrap();
        assert_eq!(back.bytes, 300);
        assert_eq!(back.sectors, 3);
        assert_eq!(&back.data[..3], &[7, 9, 4]);
    }

    #[test]
    fn dir_entry_name_handling() {
        let entry = RawDirEntry::new(12, true, "projects").unwrap();
        assert_eq!(entry.name_as_str().unwrap(), "projects");
        assert!(entry.is_dir());

        let long = "x".repeat(NAME_MAX + 1);
        assert_eq!(
            RawDirEntry::new(0, false, &long).unwrap_err(),
            LayoutError::NameTooLong
        );

        let max = "y".repeat(NAME_MAX);
        let entry = RawDirEntry::new(3, false, &max).unwrap();
        assert_eq!(entry.name_as_str().unwrap(), max);
    }

    #[test]
    fn exec_header_accepts_native_order() {
        let header = ExecHeader {
            magic: EXEC_MAGIC,
            code: ExecSegment {
                virtual_addr: 0,
                in_file_addr: EXEC_HEADER_SIZE as u32,
                size: 256,
            },
            init_data: ExecSegment::default(),
            uninit_data: ExecSegment::default(),
        };
        let parsed = ExecHeader::parse(bytemuck::bytes_of(&header)).unwrap();
        assert_eq!(parsed.code.size, 256);
    }

    #[test]
    fn exec_header_normalizes_swapped_order() {
        let mut header = ExecHeader {
            magic: EXEC_MAGIC,
            code: ExecSegment {
                virtual_addr: 0x100,
                in_file_addr: 0x34,
                size: 0x80,
            },
            init_data: ExecSegment::default(),
            uninit_data: ExecSegment::default(),
        };
        header.swap_all();
        let parsed = ExecHeader::parse(bytemuck::bytes_of(&header)).unwrap();
        assert_eq!(parsed.magic, EXEC_MAGIC);
        assert_eq!(parsed.code.virtual_addr, 0x100);
        assert_eq!(parsed.code.size, 0x80);
    }

    #[test]
    fn exec_header_rejects_garbage() {
        let buf = [0u8; EXEC_HEADER_SIZE];
        assert!(matches!(
            ExecHeader::parse(&buf),
            Err(LayoutError::BadMagic(0))
        ));
    }
}
