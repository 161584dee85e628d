//! Synchronous access to the raw disk: one outstanding request at a time,
//! each rendezvousing with the device's completion interrupt through a
//! semaphore.

use std::sync::Arc;

use oxidos_layout::SECTOR_SIZE;
use oxidos_machine::Disk;

use crate::error::FsError;
use crate::threads::sync::{Lock, Semaphore};
use crate::threads::ThreadKernel;

pub struct SynchDisk {
    disk: Arc<Disk>,
    request_lock: Lock,
    done: Arc<Semaphore>,
}

impl SynchDisk {
    pub fn new(tk: &Arc<ThreadKernel>, disk: Arc<Disk>) -> Self {
        let done = Arc::new(Semaphore::new(tk, "disk request done", 0));
        let signal = done.clone();
        disk.set_handler(Box::new(move || signal.v()));
        Self {
            disk,
            request_lock: Lock::new(tk, "synch disk"),
            done,
        }
    }

    pub fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FsError> {
        self.request_lock.acquire();
        let result = self.disk.read_sector(sector, buf);
        if result.is_ok() {
            self.done.p();
        }
        self.request_lock.release();
        result.map_err(FsError::from)
    }

    pub fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), FsError> {
        self.request_lock.acquire();
        let result = self.disk.write_sector(sector, buf);
        if result.is_ok() {
            self.done.p();
        }
        self.request_lock.release();
        result.map_err(FsError::from)
    }
}
