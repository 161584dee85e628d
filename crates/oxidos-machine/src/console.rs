use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

type DeviceHandler = Box<dyn Fn() + Send + Sync>;

/// Where console output goes: the host's stdout, or an in-memory buffer
/// that tests can inspect.
pub enum ConsoleSink {
    Stdout,
    Buffer(Vec<u8>),
}

struct ConsoleInner {
    input: VecDeque<u8>,
    sink: ConsoleSink,
}

/// Single-character console device. Input is fed from outside (the host
/// terminal or a test); each fed byte fires the read-available handler and
/// each completed output byte fires the write-done handler, mirroring the
/// device interrupts the synchronous console bridge waits on.
pub struct Console {
    inner: Mutex<ConsoleInner>,
    read_avail: Mutex<Option<DeviceHandler>>,
    write_done: Mutex<Option<DeviceHandler>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Console {
    pub fn new(sink: ConsoleSink) -> Self {
        Self {
            inner: Mutex::new(ConsoleInner {
                input: VecDeque::new(),
                sink,
            }),
            read_avail: Mutex::new(None),
            write_done: Mutex::new(None),
        }
    }

    pub fn set_handlers(&self, read_avail: DeviceHandler, write_done: DeviceHandler) {
        *lock(&self.read_avail) = Some(read_avail);
        *lock(&self.write_done) = Some(write_done);
    }

    /// Deliver input bytes to the device, one read-available interrupt per
    /// byte.
    pub fn feed_input(&self, bytes: &[u8]) {
        for &b in bytes {
            lock(&self.inner).input.push_back(b);
            if let Some(handler) = lock(&self.read_avail).as_ref() {
                handler();
            }
        }
    }

    /// Device register read: take the next buffered input character.
    pub fn get_char(&self) -> Option<u8> {
        lock(&self.inner).input.pop_front()
    }

    /// Device register write: emit one character, then signal completion.
    pub fn put_char(&self, b: u8) {
        {
            let mut inner = lock(&self.inner);
            match &mut inner.sink {
                ConsoleSink::Stdout => {
                    let mut out = io::stdout();
                    let _ = out.write_all(&[b]);
                    let _ = out.flush();
                }
                ConsoleSink::Buffer(buf) => buf.push(b),
            }
        }
        if let Some(handler) = lock(&self.write_done).as_ref() {
            handler();
        }
    }

    /// Drain the buffered output (test sink only).
    pub fn take_output(&self) -> Vec<u8> {
        let mut inner = lock(&self.inner);
        match &mut inner.sink {
            ConsoleSink::Buffer(buf) => std::mem::take(buf),
            ConsoleSink::Stdout => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn input_fires_one_interrupt_per_byte() {
        let console = Console::new(ConsoleSink::Buffer(Vec::new()));
        let reads = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let r = reads.clone();
        let w = writes.clone();
        console.set_handlers(
            Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move || {
                w.fetch_add(1, Ordering::SeqCst);
            }),
        );

        console.feed_input(b"hi");
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(console.get_char(), Some(b'h'));
        assert_eq!(console.get_char(), Some(b'i'));
        assert_eq!(console.get_char(), None);

        console.put_char(b'!');
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(console.take_output(), b"!");
    }
}
