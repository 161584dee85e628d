//! Sector-keyed reader/writer lock manager for directories.
//!
//! A node exists exactly while threads hold or queue for its lock. The
//! manager lock covers only map lookup, node creation/destruction and
//! use-count updates; the reader/writer acquire happens outside it, so
//! traffic on unrelated sectors never serializes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::fs::rwlock::ReaderWriter;
use crate::threads::sync::Lock;
use crate::threads::ThreadKernel;
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLockMode {
    Read,
    Write,
}

struct LockNode {
    rw: Arc<ReaderWriter>,
    use_count: u32,
}

pub struct DirLockManager {
    tk: Arc<ThreadKernel>,
    manager_lock: Lock,
    nodes: Mutex<HashMap<u32, LockNode>>,
}

impl DirLockManager {
    pub fn new(tk: &Arc<ThreadKernel>) -> Self {
        Self {
            tk: Arc::clone(tk),
            manager_lock: Lock::new(tk, "directory lock manager"),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, sector: u32, mode: DirLockMode) {
        self.manager_lock.acquire();
        let rw = {
            let mut nodes = lock(&self.nodes);
            let node = nodes.entry(sector).or_insert_with(|| LockNode {
                rw: Arc::new(ReaderWriter::new(&self.tk, format!("dir sector {sector}"))),
                use_count: 0,
            });
            node.use_count += 1;
            node.rw.clone()
        };
        self.manager_lock.release();

        trace!("dir lock acquire sector {} {:?}", sector, mode);
        match mode {
            DirLockMode::Read => rw.acquire_read(),
            DirLockMode::Write => rw.acquire_write(),
        }
    }

    pub fn release(&self, sector: u32, mode: DirLockMode) {
        self.manager_lock.acquire();
        let rw = {
            let mut nodes = lock(&self.nodes);
            let node = nodes
                .get_mut(&sector)
                .expect("release of a directory lock that was never acquired");
            node.use_count -= 1;
            let rw = node.rw.clone();
            if node.use_count == 0 {
                nodes.remove(&sector);
            }
            rw
        };
        self.manager_lock.release();

        trace!("dir lock release sector {} {:?}", sector, mode);
        // The Arc keeps the lock alive for any thread still queued on it;
        // a later acquire on the same sector gets a fresh node.
        match mode {
            DirLockMode::Read => rw.release_read(),
            DirLockMode::Write => rw.release_write(),
        }
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        lock(&self.nodes).len()
    }
}

/// Scoped hold of one directory's lock; releases on drop, so every error
/// path through a traversal releases exactly what it acquired.
pub struct DirGuard<'a> {
    manager: &'a DirLockManager,
    sector: u32,
    mode: DirLockMode,
}

impl<'a> DirGuard<'a> {
    pub fn acquire(manager: &'a DirLockManager, sector: u32, mode: DirLockMode) -> Self {
        manager.acquire(sector, mode);
        Self {
            manager,
            sector,
            mode,
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.sector, self.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_live_while_used() {
        let tk = ThreadKernel::new();
        let mgr = DirLockManager::new(&tk);
        assert_eq!(mgr.node_count(), 0);

        mgr.acquire(7, DirLockMode::Read);
        mgr.acquire(7, DirLockMode::Read);
        mgr.acquire(9, DirLockMode::Write);
        assert_eq!(mgr.node_count(), 2);

        mgr.release(7, DirLockMode::Read);
        assert_eq!(mgr.node_count(), 2);
        mgr.release(7, DirLockMode::Read);
        assert_eq!(mgr.node_count(), 1);
        mgr.release(9, DirLockMode::Write);
        assert_eq!(mgr.node_count(), 0);
    }

    #[test]
    fn unrelated_sectors_do_not_contend() {
        let tk = ThreadKernel::new();
        let mgr = Arc::new(DirLockManager::new(&tk));
        mgr.acquire(1, DirLockMode::Write);

        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (m, d) = (mgr.clone(), done.clone());
        tk.fork("other", 0, false, move || {
            m.acquire(2, DirLockMode::Write);
            m.release(2, DirLockMode::Write);
            d.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        tk.yield_now();
        // sector 2 was free even though sector 1 is write-held
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
        mgr.release(1, DirLockMode::Write);
    }

    #[test]
    fn guard_releases_on_drop() {
        let tk = ThreadKernel::new();
        let mgr = DirLockManager::new(&tk);
        {
            let _g = DirGuard::acquire(&mgr, 3, DirLockMode::Write);
            assert_eq!(mgr.node_count(), 1);
        }
        assert_eq!(mgr.node_count(), 0);
    }
}
