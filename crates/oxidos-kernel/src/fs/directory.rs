//! In-memory projection of one on-disk directory record.
//!
//! The on-disk form is `[count: u32][entry] * count`. Callers hold the
//! directory's reader/writer lock (via the lock manager) around fetch,
//! mutation and write-back; this type only shuffles bytes and entries.

use std::sync::Arc;

use oxidos_layout::{RawDirEntry, DIR_ENTRY_SIZE, NAME_MAX};

use crate::error::FsError;
use crate::fs::open_file::OpenFile;
use crate::fs::FsCore;

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub sector: u32,
    pub is_dir: bool,
}

pub struct Directory {
    sector: u32,
    entries: Vec<DirEntry>,
}

impl Directory {
    pub fn empty(sector: u32) -> Self {
        Self {
            sector,
            entries: Vec::new(),
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Load the directory stored at `sector` from disk.
    pub fn fetch(core: &Arc<FsCore>, sector: u32) -> Result<Self, FsError> {
        let mut file = OpenFile::raw(core, sector)?;
        let mut count_buf = [0u8; 4];
        let n = file.read_at(&mut count_buf, 0)?;
        if n < 4 {
            // freshly created directory body
            return Ok(Self::empty(sector));
        }
        let count = u32::from_le_bytes(count_buf);

        let mut entries = Vec::with_capacity(count as usize);
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        for i in 0..count {
            let offset = 4 + i * DIR_ENTRY_SIZE as u32;
            file.read_at(&mut raw, offset)?;
            let entry: RawDirEntry = bytemuck::pod_read_unaligned(&raw);
            entries.push(DirEntry {
                name: entry.name_as_str()?.to_string(),
                sector: entry.sector,
                is_dir: entry.is_dir(),
            });
        }
        Ok(Self { sector, entries })
    }

    /// Flush the projection back to the directory's file.
    pub fn write_back(&self, core: &Arc<FsCore>) -> Result<(), FsError> {
        let mut file = OpenFile::raw(core, self.sector)?;
        let mut body =
            Vec::with_capacity(4 + self.entries.len() * DIR_ENTRY_SIZE);
        body.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            let raw = RawDirEntry::new(entry.sector, entry.is_dir, &entry.name)?;
            body.extend_from_slice(bytemuck::bytes_of(&raw));
        }
        file.write_at(&body, 0)?;
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn add(&mut self, name: &str, sector: u32, is_dir: bool) -> Result<(), FsError> {
        Self::validate_name(name)?;
        if self.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.entries.push(DirEntry {
            name: name.to_string(),
            sector,
            is_dir,
        });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<DirEntry, FsError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(FsError::NotFound)?;
        Ok(self.entries.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn validate_name(name: &str) -> Result<(), FsError> {
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }
}
