//! Synchronization primitives: counting semaphore, lock with ownership and
//! priority donation, Mesa-style condition variable, and the synchronous
//! port.
//!
//! Atomicity comes from the interrupt gate plus the single-runner
//! discipline of the thread kernel: kernel code only interleaves at
//! suspension points, and every suspension goes through `Semaphore::p`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::threads::{ThreadKernel, Tid};
use crate::util::lock;

struct SemInner {
    value: u32,
    queue: VecDeque<Tid>,
}

/// Counting semaphore with a FIFO wait queue.
pub struct Semaphore {
    name: String,
    tk: Arc<ThreadKernel>,
    inner: Mutex<SemInner>,
}

impl Semaphore {
    pub fn new(tk: &Arc<ThreadKernel>, name: impl Into<String>, value: u32) -> Self {
        Self {
            name: name.into(),
            tk: Arc::clone(tk),
            inner: Mutex::new(SemInner {
                value,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the value is positive, then consume one unit.
    pub fn p(&self) {
        let old = self.tk.disable_interrupts();
        loop {
            let mut g = lock(&self.inner);
            if g.value > 0 {
                g.value -= 1;
                break;
            }
            g.queue.push_back(self.tk.current());
            drop(g);
            self.tk.sleep_current();
            // other threads ran while we slept; re-enter the mask before
            // re-checking the value
            self.tk.disable_interrupts();
        }
        trace!("P on '{}'", self.name);
        self.tk.restore_interrupts(old);
    }

    /// Add one unit and make the oldest waiter, if any, ready.
    pub fn v(&self) {
        let old = self.tk.disable_interrupts();
        let waiter = {
            let mut g = lock(&self.inner);
            g.value += 1;
            g.queue.pop_front()
        };
        if let Some(thread) = waiter {
            self.tk.wake(thread);
        }
        trace!("V on '{}'", self.name);
        self.tk.restore_interrupts(old);
    }

    pub fn value(&self) -> u32 {
        lock(&self.inner).value
    }
}

/// Mutual-exclusion lock with an owner. Re-entry is a kernel assert.
/// Acquiring a lock held by a weaker-priority thread donates the caller's
/// priority to the holder until release.
pub struct Lock {
    name: String,
    tk: Arc<ThreadKernel>,
    semaphore: Semaphore,
    owner: Mutex<Option<Tid>>,
}

impl Lock {
    pub fn new(tk: &Arc<ThreadKernel>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            semaphore: Semaphore::new(tk, format!("semaphore of {name}"), 1),
            name,
            tk: Arc::clone(tk),
            owner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn acquire(&self) {
        let me = self.tk.current();
        assert!(
            !self.is_held_by_current_thread(),
            "lock '{}' re-entered",
            self.name
        );

        // Donate priority if the holder is weaker than us.
        if let Some(owner) = *lock(&self.owner) {
            let mine = self.tk.priority_of(me).unwrap_or(0);
            let theirs = self.tk.priority_of(owner).unwrap_or(0);
            if mine > theirs {
                self.tk.promote(owner, mine);
            }
        }

        self.semaphore.p();
        *lock(&self.owner) = Some(me);
    }

    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "lock '{}' released by a thread that does not hold it",
            self.name
        );
        // Undo any donation received while holding this lock.
        self.tk.demote_current();
        *lock(&self.owner) = None;
        self.semaphore.v();
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *lock(&self.owner) == Some(self.tk.current())
    }

    pub fn owner(&self) -> Option<Tid> {
        *lock(&self.owner)
    }
}

/// Condition variable bound to a lock, with Mesa semantics: a waiter must
/// re-check its predicate after waking because the signaller keeps the
/// lock. Each waiter sleeps on a private semaphore, so a signal wakes
/// exactly the oldest waiter and no wakeup is lost.
pub struct Condition {
    name: String,
    tk: Arc<ThreadKernel>,
    cond_lock: Arc<Lock>,
    waiters: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    pub fn new(tk: &Arc<ThreadKernel>, name: impl Into<String>, cond_lock: Arc<Lock>) -> Self {
        Self {
            name: name.into(),
            tk: Arc::clone(tk),
            cond_lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically release the bound lock and sleep; reacquire on wake.
    pub fn wait(&self) {
        assert!(
            self.cond_lock.is_held_by_current_thread(),
            "wait on '{}' without holding its lock",
            self.name
        );
        let sem = Arc::new(Semaphore::new(&self.tk, format!("waiter of {}", self.name), 0));
        lock(&self.waiters).push_back(sem.clone());
        self.cond_lock.release();
        sem.p();
        self.cond_lock.acquire();
    }

    /// Wake the oldest waiter, if any.
    pub fn signal(&self) {
        assert!(
            self.cond_lock.is_held_by_current_thread(),
            "signal on '{}' without holding its lock",
            self.name
        );
        if let Some(sem) = lock(&self.waiters).pop_front() {
            sem.v();
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        assert!(
            self.cond_lock.is_held_by_current_thread(),
            "broadcast on '{}' without holding its lock",
            self.name
        );
        let drained: Vec<_> = lock(&self.waiters).drain(..).collect();
        for sem in drained {
            sem.v();
        }
    }
}

struct PortSlot {
    message: Option<i32>,
}

/// Single-slot synchronous rendezvous. A send does not return until a
/// receive has consumed exactly its message, and vice versa.
pub struct Port {
    name: String,
    port_lock: Arc<Lock>,
    slot: Mutex<PortSlot>,
    sender: Condition,
    receiver: Condition,
    /// Parks each sender until its own message has been taken; one signal
    /// per receive, in fill order, keeps the pairing synchronous.
    sender_blocker: Condition,
}

impl Port {
    pub fn new(tk: &Arc<ThreadKernel>, name: impl Into<String>) -> Self {
        let name = name.into();
        let port_lock = Arc::new(Lock::new(tk, format!("lock of {name}")));
        Self {
            sender: Condition::new(tk, format!("sender of {name}"), port_lock.clone()),
            receiver: Condition::new(tk, format!("receiver of {name}"), port_lock.clone()),
            sender_blocker: Condition::new(
                tk,
                format!("sender blocker of {name}"),
                port_lock.clone(),
            ),
            port_lock,
            slot: Mutex::new(PortSlot { message: None }),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: i32) {
        self.port_lock.acquire();
        while lock(&self.slot).message.is_some() {
            self.sender.wait();
        }
        lock(&self.slot).message = Some(message);
        self.receiver.signal();
        // Block until a receiver has taken our message.
        self.sender_blocker.wait();
        self.port_lock.release();
    }

    pub fn receive(&self) -> i32 {
        self.port_lock.acquire();
        let message = loop {
            if let Some(m) = lock(&self.slot).message.take() {
                break m;
            }
            self.receiver.wait();
        };
        self.sender_blocker.signal();
        self.sender.signal();
        self.port_lock.release();
        message
    }
}
