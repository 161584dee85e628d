//! Blocking console on top of the interrupt-driven character device.
//!
//! One mutex per direction serializes callers; one semaphore per
//! direction rendezvouses with the device's read-available and
//! write-done interrupts.

use std::sync::Arc;

use oxidos_machine::Console;

use crate::threads::sync::{Lock, Semaphore};
use crate::threads::ThreadKernel;

pub struct SynchConsole {
    device: Arc<Console>,
    reader_lock: Lock,
    writer_lock: Lock,
    read_avail: Arc<Semaphore>,
    write_done: Arc<Semaphore>,
}

impl SynchConsole {
    pub fn new(tk: &Arc<ThreadKernel>, device: Arc<Console>) -> Self {
        let read_avail = Arc::new(Semaphore::new(tk, "console read avail", 0));
        let write_done = Arc::new(Semaphore::new(tk, "console write done", 0));
        let on_read = read_avail.clone();
        let on_write = write_done.clone();
        device.set_handlers(
            Box::new(move || on_read.v()),
            Box::new(move || on_write.v()),
        );
        Self {
            device,
            reader_lock: Lock::new(tk, "console reader"),
            writer_lock: Lock::new(tk, "console writer"),
            read_avail,
            write_done,
        }
    }

    /// Block until a character arrives, then take it.
    pub fn get_char(&self) -> u8 {
        self.reader_lock.acquire();
        self.read_avail.p();
        let c = self.device.get_char().unwrap_or(0);
        self.reader_lock.release();
        c
    }

    /// Emit one character, blocking until the device reports completion.
    pub fn put_char(&self, c: u8) {
        self.writer_lock.acquire();
        self.device.put_char(c);
        self.write_done.p();
        self.writer_lock.release();
    }
}
