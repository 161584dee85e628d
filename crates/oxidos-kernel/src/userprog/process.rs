//! Process identities and per-thread open-file tables.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::fs::open_file::OpenFile;
use crate::threads::Tid;
use crate::util::lock;

/// Identity assigned to a thread running a user program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Slot {
    Free,
    /// Id handed out, thread not forked yet.
    Reserved,
    Bound(Tid),
}

/// SpaceId ⇄ thread table. Ids are reserved before the thread exists (the
/// swap file is named after the id) and unbound exactly once on exit.
pub struct ProcessTable {
    slots: Mutex<Vec<Slot>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn reserve(&self) -> SpaceId {
        let mut slots = lock(&self.slots);
        for (i, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Free) {
                *slot = Slot::Reserved;
                return SpaceId(i as u32);
            }
        }
        slots.push(Slot::Reserved);
        SpaceId(slots.len() as u32 - 1)
    }

    pub fn bind(&self, id: SpaceId, thread: Tid) {
        let mut slots = lock(&self.slots);
        slots[id.0 as usize] = Slot::Bound(thread);
    }

    pub fn get(&self, id: SpaceId) -> Option<Tid> {
        let slots = lock(&self.slots);
        match slots.get(id.0 as usize) {
            Some(Slot::Bound(tid)) => Some(*tid),
            _ => None,
        }
    }

    /// Free the slot; returns the thread if one was bound. Idempotent.
    pub fn remove(&self, id: SpaceId) -> Option<Tid> {
        let mut slots = lock(&self.slots);
        match slots.get_mut(id.0 as usize) {
            Some(slot) => match std::mem::replace(slot, Slot::Free) {
                Slot::Bound(tid) => Some(tid),
                _ => None,
            },
            None => None,
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Most open files one thread may hold, console ids included.
pub const MAX_OPEN_FILES: usize = 16;

const RESERVED_IDS: usize = 2; // console input and output

/// Per-thread table mapping file ids to open-file handles. Ids 0 and 1
/// are reserved for the console and never hold a file.
pub struct FileTable {
    entries: Vec<Option<Arc<Mutex<OpenFile>>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: vec![None, None],
        }
    }

    /// Store a handle, returning its file id. A full table hands the file
    /// back so the caller can drop it outside any kernel lock (closing a
    /// file can reach the disk).
    pub fn add(&mut self, file: OpenFile) -> Result<u32, OpenFile> {
        let free = self
            .entries
            .iter()
            .enumerate()
            .skip(RESERVED_IDS)
            .find(|(_, e)| e.is_none())
            .map(|(i, _)| i);
        match free {
            Some(i) => {
                self.entries[i] = Some(Arc::new(Mutex::new(file)));
                Ok(i as u32)
            }
            None if self.entries.len() < MAX_OPEN_FILES => {
                self.entries.push(Some(Arc::new(Mutex::new(file))));
                Ok(self.entries.len() as u32 - 1)
            }
            None => Err(file),
        }
    }

    pub fn get(&self, fid: u32) -> Option<Arc<Mutex<OpenFile>>> {
        self.entries.get(fid as usize)?.clone()
    }

    /// Drop a file id. Dropping the returned handle closes the file once
    /// no I/O is in flight on it.
    pub fn remove(&mut self, fid: u32) -> Option<Arc<Mutex<OpenFile>>> {
        if (fid as usize) < RESERVED_IDS {
            return None;
        }
        self.entries.get_mut(fid as usize)?.take()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_bind_remove_cycle() {
        let table = ProcessTable::new();
        let a = table.reserve();
        let b = table.reserve();
        assert_ne!(a, b);

        let tid = Tid::from_raw(7).unwrap();
        table.bind(a, tid);
        assert_eq!(table.get(a), Some(tid));
        assert_eq!(table.get(b), None); // reserved, not bound

        assert_eq!(table.remove(a), Some(tid));
        assert_eq!(table.remove(a), None); // at most once
        assert_eq!(table.get(a), None);

        // freed slots are reused
        let c = table.reserve();
        assert_eq!(c, a);
    }
}
