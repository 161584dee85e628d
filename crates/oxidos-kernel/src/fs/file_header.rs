//! In-memory view of an on-disk file header: byte length plus the ordered
//! data-sector list, fitting exactly one sector.

use oxidos_layout::{RawFileHeader, NUM_DIRECT, SECTOR_SIZE};

use crate::error::FsError;
use crate::fs::bitmap::Bitmap;
use crate::fs::synch_disk::SynchDisk;
use crate::util::div_round_up;

#[derive(Debug, Clone)]
pub struct FileHeader {
    raw: RawFileHeader,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            raw: RawFileHeader::empty(),
        }
    }

    pub fn fetch_from(disk: &SynchDisk, sector: u32) -> Result<Self, FsError> {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf)?;
        Ok(Self {
            raw: RawFileHeader::from_sector(&buf)?,
        })
    }

    pub fn write_back(&self, disk: &SynchDisk, sector: u32) -> Result<(), FsError> {
        disk.write_sector(sector, &self.raw.to_sector())?;
        Ok(())
    }

    /// Allocate data sectors for a file of `bytes` bytes. Checks capacity
    /// before marking anything, so a failure leaves the map untouched.
    /// Fresh sectors are zeroed on disk.
    pub fn allocate(
        &mut self,
        map: &mut Bitmap,
        disk: &SynchDisk,
        bytes: u32,
    ) -> Result<(), FsError> {
        assert_eq!(self.raw.sectors, 0, "header already allocated");
        let sectors = div_round_up(bytes, SECTOR_SIZE as u32);
        if sectors as usize > NUM_DIRECT {
            return Err(FsError::TooLarge);
        }
        if map.count_clear() < sectors as usize {
            return Err(FsError::DiskFull);
        }
        self.raw.bytes = bytes;
        self.raw.sectors = sectors;
        let zero = [0u8; SECTOR_SIZE];
        for i in 0..sectors as usize {
            let sector = map.find().expect("free map count was checked");
            self.raw.data[i] = sector;
            disk.write_sector(sector, &zero)?;
        }
        Ok(())
    }

    /// Return every data sector to the free map.
    pub fn deallocate(&self, map: &mut Bitmap) {
        for i in 0..self.raw.sectors as usize {
            map.clear(self.raw.data[i]);
        }
    }

    /// Extend the file to hold `new_bytes` bytes, allocating and zeroing
    /// any additional sectors.
    pub fn grow(
        &mut self,
        map: &mut Bitmap,
        disk: &SynchDisk,
        new_bytes: u32,
    ) -> Result<(), FsError> {
        if new_bytes <= self.raw.bytes {
            return Ok(());
        }
        let new_sectors = div_round_up(new_bytes, SECTOR_SIZE as u32);
        if new_sectors as usize > NUM_DIRECT {
            return Err(FsError::TooLarge);
        }
        let extra = new_sectors.saturating_sub(self.raw.sectors);
        if map.count_clear() < extra as usize {
            return Err(FsError::DiskFull);
        }
        let zero = [0u8; SECTOR_SIZE];
        for i in self.raw.sectors..new_sectors {
            let sector = map.find().expect("free map count was checked");
            self.raw.data[i as usize] = sector;
            disk.write_sector(sector, &zero)?;
        }
        self.raw.sectors = new_sectors;
        self.raw.bytes = new_bytes;
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.raw.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.raw.bytes == 0
    }

    pub fn num_sectors(&self) -> u32 {
        self.raw.sectors
    }

    /// Data sector backing the given byte offset.
    pub fn sector_of(&self, offset: u32) -> u32 {
        let index = offset / SECTOR_SIZE as u32;
        assert!(index < self.raw.sectors, "offset {offset} beyond file");
        self.raw.data[index as usize]
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
