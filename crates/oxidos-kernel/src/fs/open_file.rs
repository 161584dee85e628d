//! Open-file handle: sequential and positioned reads and writes against
//! the sectors named by the file's header.
//!
//! Every registered handle routes data access through the reader/writer
//! lock shared by all handles open on the same name. Writes past
//! end-of-file grow the file, which takes the free-map lock; callers must
//! not already hold it.

use std::sync::Arc;

use oxidos_layout::SECTOR_SIZE;

use crate::error::FsError;
use crate::fs::file_header::FileHeader;
use crate::fs::registry::OpenFileRegistry;
use crate::fs::rwlock::ReaderWriter;
use crate::fs::FsCore;

pub struct OpenFile {
    core: Arc<FsCore>,
    sector: u32,
    header: FileHeader,
    seek: u32,
    rw: Option<Arc<ReaderWriter>>,
    registered: Option<(Arc<OpenFileRegistry>, String)>,
}

impl OpenFile {
    /// Internal handle bound directly to a header sector, bypassing the
    /// open-file registry and the shared lock. Used for the free-map file,
    /// directory bodies and swap files, whose callers hold their own locks.
    pub(crate) fn raw(core: &Arc<FsCore>, sector: u32) -> Result<Self, FsError> {
        let header = FileHeader::fetch_from(&core.disk, sector)?;
        Ok(Self {
            core: Arc::clone(core),
            sector,
            header,
            seek: 0,
            rw: None,
            registered: None,
        })
    }

    pub(crate) fn registered(
        core: &Arc<FsCore>,
        sector: u32,
        rw: Arc<ReaderWriter>,
        registry: Arc<OpenFileRegistry>,
        name: String,
    ) -> Result<Self, FsError> {
        let header = FileHeader::fetch_from(&core.disk, sector)?;
        Ok(Self {
            core: Arc::clone(core),
            sector,
            header,
            seek: 0,
            rw: Some(rw),
            registered: Some((registry, name)),
        })
    }

    pub fn header_sector(&self) -> u32 {
        self.sector
    }

    pub fn seek(&mut self, position: u32) {
        self.seek = position;
    }

    pub fn tell(&self) -> u32 {
        self.seek
    }

    /// Current file length, re-read from the header on disk so growth by
    /// another handle on the same name is visible.
    pub fn length(&mut self) -> Result<u32, FsError> {
        self.header = FileHeader::fetch_from(&self.core.disk, self.sector)?;
        Ok(self.header.len())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let n = self.read_at(buf, self.seek)?;
        self.seek += n as u32;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let n = self.write_at(buf, self.seek)?;
        self.seek += n as u32;
        Ok(n)
    }

    /// Read up to `buf.len()` bytes at `offset`; short counts only at
    /// end-of-file.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u32) -> Result<usize, FsError> {
        if let Some(rw) = self.rw.clone() {
            rw.acquire_read();
            let result = self.read_at_inner(buf, offset);
            rw.release_read();
            result
        } else {
            self.read_at_inner(buf, offset)
        }
    }

    /// Write `buf` at `offset`, growing the file if it ends past the
    /// current length.
    pub fn write_at(&mut self, buf: &[u8], offset: u32) -> Result<usize, FsError> {
        if let Some(rw) = self.rw.clone() {
            rw.acquire_write();
            let result = self.write_at_inner(buf, offset);
            rw.release_write();
            result
        } else {
            self.write_at_inner(buf, offset)
        }
    }

    fn read_at_inner(&mut self, buf: &mut [u8], offset: u32) -> Result<usize, FsError> {
        self.header = FileHeader::fetch_from(&self.core.disk, self.sector)?;
        let len = self.header.len();
        if offset >= len || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u32).min(len - offset) as usize;

        let mut copied = 0;
        let mut pos = offset;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        while copied < n {
            let in_sector = (pos % SECTOR_SIZE as u32) as usize;
            let chunk = (SECTOR_SIZE - in_sector).min(n - copied);
            self.core
                .disk
                .read_sector(self.header.sector_of(pos), &mut sector_buf)?;
            buf[copied..copied + chunk].copy_from_slice(&sector_buf[in_sector..in_sector + chunk]);
            copied += chunk;
            pos += chunk as u32;
        }
        Ok(n)
    }

    fn write_at_inner(&mut self, buf: &[u8], offset: u32) -> Result<usize, FsError> {
        self.header = FileHeader::fetch_from(&self.core.disk, self.sector)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset + buf.len() as u32;
        if end > self.header.len() {
            let sector = self.sector;
            let header = &mut self.header;
            let disk = &self.core.disk;
            self.core.with_free_map(|map| {
                header.grow(map, disk, end)?;
                header.write_back(disk, sector)
            })?;
        }

        let mut copied = 0;
        let mut pos = offset;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        while copied < buf.len() {
            let in_sector = (pos % SECTOR_SIZE as u32) as usize;
            let chunk = (SECTOR_SIZE - in_sector).min(buf.len() - copied);
            let sector = self.header.sector_of(pos);
            if chunk < SECTOR_SIZE {
                // partial sector: read-modify-write
                self.core.disk.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[in_sector..in_sector + chunk]
                .copy_from_slice(&buf[copied..copied + chunk]);
            self.core.disk.write_sector(sector, &sector_buf)?;
            copied += chunk;
            pos += chunk as u32;
        }
        Ok(buf.len())
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let Some((registry, name)) = self.registered.take() {
            registry.close_open_file(&name);
        }
    }
}
