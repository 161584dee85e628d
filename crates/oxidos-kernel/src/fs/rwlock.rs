//! Many-readers / one-writer lock built from a lock and a condition.
//!
//! Writers wait on the "no readers" condition until the reader count
//! drains; readers only block while a writer holds the internal lock.
//! Readers can starve writers under a bursty read load; directory writers
//! are rare enough that this is acceptable.

use std::sync::{Arc, Mutex};

use crate::threads::sync::{Condition, Lock};
use crate::threads::ThreadKernel;
use crate::util::lock;

pub struct ReaderWriter {
    guard: Arc<Lock>,
    no_readers: Condition,
    readers: Mutex<u32>,
}

impl ReaderWriter {
    pub fn new(tk: &Arc<ThreadKernel>, name: impl Into<String>) -> Self {
        let name = name.into();
        let guard = Arc::new(Lock::new(tk, format!("rw lock of {name}")));
        Self {
            no_readers: Condition::new(tk, format!("no readers of {name}"), guard.clone()),
            guard,
            readers: Mutex::new(0),
        }
    }

    /// Enter as a reader. A thread already inside as the writer passes
    /// straight through.
    pub fn acquire_read(&self) {
        if self.guard.is_held_by_current_thread() {
            return;
        }
        self.guard.acquire();
        *lock(&self.readers) += 1;
        self.guard.release();
    }

    pub fn release_read(&self) {
        if self.guard.is_held_by_current_thread() {
            return;
        }
        self.guard.acquire();
        let remaining = {
            let mut readers = lock(&self.readers);
            *readers -= 1;
            *readers
        };
        if remaining == 0 {
            self.no_readers.broadcast();
        }
        self.guard.release();
    }

    /// Enter as the writer: holds the internal lock for the whole critical
    /// section, keeping new readers out, and waits for current readers to
    /// drain.
    pub fn acquire_write(&self) {
        self.guard.acquire();
        while *lock(&self.readers) > 0 {
            self.no_readers.wait();
        }
    }

    pub fn release_write(&self) {
        self.no_readers.signal();
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn readers_share_writer_excludes() {
        let tk = ThreadKernel::new();
        let rw = Arc::new(ReaderWriter::new(&tk, "test"));
        let inside = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        for n in 0..3 {
            let (rw, inside, peak, tk2) = (rw.clone(), inside.clone(), peak.clone(), tk.clone());
            tk.fork(&format!("reader {n}"), 0, false, move || {
                rw.acquire_read();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tk2.yield_now();
                inside.fetch_sub(1, Ordering::SeqCst);
                rw.release_read();
            });
        }
        tk.yield_now();
        // all three readers were inside together at some point
        assert_eq!(peak.load(Ordering::SeqCst), 3);

        let wrote = Arc::new(AtomicU32::new(0));
        let (rw2, inside2, wrote2) = (rw.clone(), inside.clone(), wrote.clone());
        tk.fork("writer", 0, false, move || {
            rw2.acquire_write();
            assert_eq!(inside2.load(Ordering::SeqCst), 0);
            wrote2.store(1, Ordering::SeqCst);
            rw2.release_write();
        });
        tk.yield_now();
        tk.yield_now();
        assert_eq!(wrote.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn writer_blocks_new_readers() {
        let tk = ThreadKernel::new();
        let rw = Arc::new(ReaderWriter::new(&tk, "test"));
        let log = Arc::new(Mutex::new(Vec::new()));

        rw.acquire_write();

        let (rw2, log2) = (rw.clone(), log.clone());
        tk.fork("reader", 0, false, move || {
            rw2.acquire_read();
            log2.lock().unwrap().push("reader in");
            rw2.release_read();
        });

        tk.yield_now(); // reader blocks on the held write lock
        log.lock().unwrap().push("writer done");
        rw.release_write();
        tk.yield_now();
        assert_eq!(*log.lock().unwrap(), ["writer done", "reader in"]);
    }
}
