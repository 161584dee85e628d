use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::trace;

use crate::error::DiskError;

type CompletionHandler = Box<dyn Fn() + Send + Sync>;

struct DiskInner {
    file: File,
    sector_size: usize,
    num_sectors: usize,
}

/// Raw sector disk backed by a host file. Requests complete synchronously
/// and then fire the completion handler, which stands in for the device
/// interrupt the synchronous-disk layer rendezvouses with.
pub struct Disk {
    inner: Mutex<DiskInner>,
    on_complete: Mutex<Option<CompletionHandler>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Disk {
    /// Open (or create) a disk image, padding it to full size so partial
    /// reads never happen.
    pub fn open(path: &Path, sector_size: usize, num_sectors: usize) -> Result<Self, DiskError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let full = (sector_size * num_sectors) as u64;
        if file.metadata()?.len() < full {
            file.set_len(full)?;
        }
        Ok(Self {
            inner: Mutex::new(DiskInner {
                file,
                sector_size,
                num_sectors,
            }),
            on_complete: Mutex::new(None),
        })
    }

    /// Register the completion handler fired after each request.
    pub fn set_handler(&self, handler: CompletionHandler) {
        *lock(&self.on_complete) = Some(handler);
    }

    pub fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        {
            let mut inner = lock(&self.inner);
            if sector as usize >= inner.num_sectors {
                return Err(DiskError::BadSector(sector));
            }
            assert_eq!(buf.len(), inner.sector_size, "sector buffer size mismatch");
            let pos = sector as u64 * inner.sector_size as u64;
            inner.file.seek(SeekFrom::Start(pos))?;
            inner.file.read_exact(buf)?;
        }
        trace!("disk read sector {}", sector);
        self.complete();
        Ok(())
    }

    pub fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        {
            let mut inner = lock(&self.inner);
            if sector as usize >= inner.num_sectors {
                return Err(DiskError::BadSector(sector));
            }
            assert_eq!(buf.len(), inner.sector_size, "sector buffer size mismatch");
            let pos = sector as u64 * inner.sector_size as u64;
            inner.file.seek(SeekFrom::Start(pos))?;
            inner.file.write_all(buf)?;
            inner.file.flush()?;
        }
        trace!("disk write sector {}", sector);
        self.complete();
        Ok(())
    }

    fn complete(&self) {
        if let Some(handler) = lock(&self.on_complete).as_ref() {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sectors_round_trip_and_interrupt_fires() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(&dir.path().join("DISK"), 128, 16).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        disk.set_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let mut buf = [0u8; 128];
        buf[0] = 0xab;
        buf[127] = 0xcd;
        disk.write_sector(5, &buf).unwrap();

        let mut back = [0u8; 128];
        disk.read_sector(5, &mut back).unwrap();
        assert_eq!(buf, back);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(&dir.path().join("DISK"), 128, 4).unwrap();
        let mut buf = [0u8; 128];
        assert!(matches!(
            disk.read_sector(4, &mut buf),
            Err(DiskError::BadSector(4))
        ));
    }
}
