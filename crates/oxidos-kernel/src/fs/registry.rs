//! Registry of files that are currently open, keyed by normalized path.
//!
//! Each node carries the reader/writer lock shared by every handle open on
//! that name, the open count, and the pending-remove flag that defers
//! on-disk deletion until the last close. The on-disk delete itself is a
//! capability injected at construction, so the registry never points back
//! at the file-system facade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::error::FsError;
use crate::fs::rwlock::ReaderWriter;
use crate::threads::sync::Lock;
use crate::threads::ThreadKernel;
use crate::util::lock;

type ReclaimFn = Box<dyn Fn(&str) -> Result<(), FsError> + Send + Sync>;

struct Node {
    rw: Arc<ReaderWriter>,
    open_count: u32,
    pending_remove: bool,
}

pub struct OpenFileRegistry {
    tk: Arc<ThreadKernel>,
    registry_lock: Lock,
    nodes: Mutex<HashMap<String, Node>>,
    reclaim: ReclaimFn,
}

impl OpenFileRegistry {
    pub fn new(tk: &Arc<ThreadKernel>, reclaim: ReclaimFn) -> Self {
        Self {
            tk: Arc::clone(tk),
            registry_lock: Lock::new(tk, "open file registry"),
            nodes: Mutex::new(HashMap::new()),
            reclaim,
        }
    }

    /// Register one more open handle on `name`, returning the shared
    /// reader/writer lock. `None` while the file is pending removal: new
    /// opens must fail.
    pub fn add_open_file(&self, name: &str) -> Option<Arc<ReaderWriter>> {
        self.registry_lock.acquire();
        let result = {
            let mut nodes = lock(&self.nodes);
            match nodes.get_mut(name) {
                Some(node) if node.pending_remove => None,
                Some(node) => {
                    node.open_count += 1;
                    Some(node.rw.clone())
                }
                None => {
                    let rw = Arc::new(ReaderWriter::new(&self.tk, format!("file {name}")));
                    nodes.insert(
                        name.to_string(),
                        Node {
                            rw: rw.clone(),
                            open_count: 1,
                            pending_remove: false,
                        },
                    );
                    Some(rw)
                }
            }
        };
        self.registry_lock.release();
        result
    }

    /// Drop one open handle. The last close of a file pending removal
    /// performs the on-disk delete through the injected capability.
    pub fn close_open_file(&self, name: &str) {
        self.registry_lock.acquire();
        let reclaim_now = {
            let mut nodes = lock(&self.nodes);
            match nodes.get_mut(name) {
                Some(node) => {
                    node.open_count -= 1;
                    if node.open_count == 0 {
                        let pending = node.pending_remove;
                        nodes.remove(name);
                        pending
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if reclaim_now {
            debug!("last close of '{}': deleting from disk", name);
            if let Err(e) = (self.reclaim)(name) {
                error!("deferred delete of '{}' failed: {}", name, e);
            }
        }
        self.registry_lock.release();
    }

    /// Remove `name`: if it is currently open, flag it for deferred
    /// removal; otherwise run `delete_now` while still holding the
    /// registry lock, so no open can slip in between the check and the
    /// delete.
    pub fn remove_or_defer(
        &self,
        name: &str,
        delete_now: impl FnOnce() -> Result<(), FsError>,
    ) -> Result<(), FsError> {
        self.registry_lock.acquire();
        let deferred = {
            let mut nodes = lock(&self.nodes);
            match nodes.get_mut(name) {
                Some(node) => {
                    node.pending_remove = true;
                    true
                }
                None => false,
            }
        };
        let result = if deferred {
            debug!("'{}' is open: removal deferred to last close", name);
            Ok(())
        } else {
            delete_now()
        };
        self.registry_lock.release();
        result
    }

    pub fn is_open(&self, name: &str) -> bool {
        lock(&self.nodes).contains_key(name)
    }
}
