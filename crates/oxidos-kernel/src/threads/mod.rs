//! The cooperative thread kernel.
//!
//! Each kernel thread is a host thread parked on a private run token; the
//! manager grants exactly one token at any time, so exactly one thread
//! executes between suspension points. Granting the next thread's token
//! and parking on one's own is the context switch.

pub mod scheduler;
pub mod sync;
pub mod tcb;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, trace};
use oxidos_machine::{Machine, NUM_TOTAL_REGS};

use crate::fs::path::FilePath;
use crate::threads::scheduler::{Scheduler, NUM_PRIORITIES};
use crate::threads::sync::Port;
use crate::threads::tcb::{RunToken, Status, Tcb};
use crate::userprog::process::{FileTable, SpaceId};
use crate::util::lock;
use crate::vm::addr_space::AddressSpace;

/// Thread identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tid(NonZeroU32);

impl Tid {
    pub fn from_raw(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

thread_local! {
    static CURRENT: Cell<Option<Tid>> = Cell::new(None);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    Off,
    On,
}

struct IntState {
    level: IntLevel,
    ticks: u64,
    timer_interval: Option<u64>,
    since_yield: u64,
}

struct ManagerState {
    threads: BTreeMap<Tid, Tcb>,
    scheduler: Scheduler,
    current: Tid,
    to_destroy: Option<Tid>,
    next_id: u32,
}

/// Extra attributes for forking a thread that runs a user program.
pub struct ForkOptions {
    pub priority: u32,
    pub joinable: bool,
    pub space: Option<Arc<AddressSpace>>,
    pub space_id: Option<SpaceId>,
    pub user_regs: Option<[u32; NUM_TOTAL_REGS]>,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            joinable: false,
            space: None,
            space_id: None,
            user_regs: None,
        }
    }
}

/// Thread manager, ready queues and the interrupt gate.
pub struct ThreadKernel {
    state: Mutex<ManagerState>,
    int: Mutex<IntState>,
    machine: OnceLock<Arc<Machine>>,
}

impl ThreadKernel {
    /// Create the thread kernel and adopt the calling host thread as the
    /// initial "main" thread, already running at priority 0.
    pub fn new() -> Arc<Self> {
        let main_tid = Tid::from_raw(1).unwrap();
        let tcb = Tcb {
            name: "main".into(),
            status: Status::Running,
            priority: 0,
            original_priority: 0,
            joinable: false,
            join_port: None,
            token: RunToken::new(),
            user_regs: None,
            space: None,
            files: None,
            space_id: None,
            cwd: FilePath::root(),
        };
        let mut threads = BTreeMap::new();
        threads.insert(main_tid, tcb);
        CURRENT.with(|c| c.set(Some(main_tid)));
        Arc::new(Self {
            state: Mutex::new(ManagerState {
                threads,
                scheduler: Scheduler::new(),
                current: main_tid,
                to_destroy: None,
                next_id: 2,
            }),
            int: Mutex::new(IntState {
                level: IntLevel::On,
                ticks: 0,
                timer_interval: None,
                since_yield: 0,
            }),
            machine: OnceLock::new(),
        })
    }

    pub fn attach_machine(&self, machine: Arc<Machine>) {
        let _ = self.machine.set(machine);
    }

    pub fn machine(&self) -> Option<&Arc<Machine>> {
        self.machine.get()
    }

    /// The kernel thread executing right now.
    pub fn current(&self) -> Tid {
        CURRENT.with(|c| c.get()).expect("calling host thread is not a kernel thread")
    }

    pub fn current_name(&self) -> String {
        let me = self.current();
        let st = lock(&self.state);
        st.threads[&me].name.clone()
    }

    // ------------------------------------------------------------------
    // Interrupt gate
    // ------------------------------------------------------------------

    /// Disable interrupts, returning the previous level for `restore`.
    pub fn disable_interrupts(&self) -> IntLevel {
        let mut g = lock(&self.int);
        std::mem::replace(&mut g.level, IntLevel::Off)
    }

    /// Restore a saved interrupt level. Re-enabling counts one tick and,
    /// when the software timer is armed and due, yields the processor.
    pub fn restore_interrupts(&self, old: IntLevel) {
        let mut should_yield = false;
        {
            let mut g = lock(&self.int);
            if old == IntLevel::On && g.level == IntLevel::Off {
                g.level = IntLevel::On;
                g.ticks += 1;
                if let Some(interval) = g.timer_interval {
                    g.since_yield += 1;
                    if g.since_yield >= interval {
                        g.since_yield = 0;
                        should_yield = true;
                    }
                }
            } else {
                g.level = old;
            }
        }
        if should_yield {
            trace!("timer tick: yielding");
            self.yield_now();
        }
    }

    pub fn interrupt_level(&self) -> IntLevel {
        lock(&self.int).level
    }

    /// Arm the software timer: force a yield every `interval` ticks.
    pub fn arm_timer(&self, interval: u64) {
        lock(&self.int).timer_interval = Some(interval);
    }

    pub fn ticks(&self) -> u64 {
        lock(&self.int).ticks
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Fork a kernel thread; it becomes Ready and runs `f` on first
    /// dispatch, finishing when `f` returns.
    pub fn fork<F>(self: &Arc<Self>, name: &str, priority: u32, joinable: bool, f: F) -> Tid
    where
        F: FnOnce() + Send + 'static,
    {
        self.fork_with(
            name,
            ForkOptions {
                priority,
                joinable,
                ..ForkOptions::default()
            },
            f,
        )
    }

    pub fn fork_with<F>(self: &Arc<Self>, name: &str, opts: ForkOptions, f: F) -> Tid
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(
            opts.priority < NUM_PRIORITIES,
            "priority {} out of range",
            opts.priority
        );

        let join_port = opts
            .joinable
            .then(|| Arc::new(Port::new(self, format!("join port of {name}"))));
        let token = RunToken::new();
        let has_space = opts.space.is_some();

        let tid = {
            let mut st = lock(&self.state);
            let tid = Tid::from_raw(st.next_id).expect("thread id overflow");
            st.next_id += 1;
            let cwd = st.threads[&st.current].cwd.clone();
            let tcb = Tcb {
                name: name.into(),
                status: Status::JustCreated,
                priority: opts.priority,
                original_priority: opts.priority,
                joinable: opts.joinable,
                join_port,
                token: token.clone(),
                user_regs: opts.user_regs,
                space: opts.space,
                files: has_space.then(FileTable::new),
                space_id: opts.space_id,
                cwd,
            };
            st.threads.insert(tid, tcb);
            let tcb = st.threads.get_mut(&tid).unwrap();
            tcb.status = Status::Ready;
            st.scheduler.ready_to_run(tid, opts.priority);
            tid
        };
        debug!("forked thread '{}' as {:?}", name, tid);

        let tk = Arc::clone(self);
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                token.wait();
                CURRENT.with(|c| c.set(Some(tid)));
                tk.after_resume();
                // the first dispatch of a new thread re-enables interrupts
                tk.restore_interrupts(IntLevel::On);
                f();
                tk.exit_current(0);
                // host thread ends here; the Tcb is reaped by the next
                // dispatched thread
            })
            .expect("failed to spawn host thread");
        tid
    }

    /// Relinquish the processor if any other thread is ready, queueing the
    /// caller behind its priority peers.
    pub fn yield_now(&self) {
        let mut st = lock(&self.state);
        let me = st.current;
        if let Some(next) = st.scheduler.find_next_to_run() {
            let priority = st.threads[&me].priority;
            let tcb = st.threads.get_mut(&me).unwrap();
            tcb.status = Status::Ready;
            st.scheduler.ready_to_run(me, priority);
            self.switch_to(st, next);
        }
    }

    /// Block the caller until some other thread wakes it. Interrupts must
    /// be disabled. There are no asynchronous interrupt sources in the
    /// simulation, so an empty ready list here means every thread is
    /// blocked: a kernel assert.
    pub fn sleep_current(&self) {
        assert_eq!(
            self.interrupt_level(),
            IntLevel::Off,
            "sleep with interrupts enabled"
        );
        let mut st = lock(&self.state);
        let me = st.current;
        st.threads.get_mut(&me).unwrap().status = Status::Blocked;
        let name = &st.threads[&me].name;
        trace!("thread '{}' sleeping", name);
        let next = match st.scheduler.find_next_to_run() {
            Some(next) => next,
            None => panic!(
                "thread '{}' blocked with nothing left to run (deadlock)",
                st.threads[&me].name
            ),
        };
        self.switch_to(st, next);
    }

    /// Make a blocked thread ready again.
    pub fn wake(&self, thread: Tid) {
        let mut st = lock(&self.state);
        if let Some(tcb) = st.threads.get_mut(&thread) {
            if tcb.status == Status::Blocked {
                tcb.status = Status::Ready;
                let priority = tcb.priority;
                st.scheduler.ready_to_run(thread, priority);
            }
        }
    }

    /// Finish the calling thread. Never returns: the host thread parks
    /// once the processor has been handed over, and the control block is
    /// reaped by the next dispatched thread.
    pub fn finish(&self, status: i32) -> ! {
        self.exit_current(status);
        loop {
            std::thread::park();
        }
    }

    /// The shared tail of `finish` and of normal thread-body return: hand
    /// the exit status to any joiner, mark the thread for destruction, and
    /// hand over the processor. Unlike `finish`, returns to the caller,
    /// which must unwind the host thread without touching kernel state.
    pub(crate) fn exit_current(&self, status: i32) {
        let port = self.take_current_join_port();
        if let Some(port) = port {
            // rendezvous with the joiner before tearing anything down
            port.send(status);
        }

        let mut st = lock(&self.state);
        let me = st.current;
        debug!("thread '{}' finishing with status {}", st.threads[&me].name, status);
        assert!(st.to_destroy.is_none(), "destruction sentinel already set");
        st.to_destroy = Some(me);
        st.threads.get_mut(&me).unwrap().status = Status::Blocked;
        let next = match st.scheduler.find_next_to_run() {
            Some(next) => next,
            None => panic!(
                "last runnable thread '{}' finished with others blocked (deadlock)",
                st.threads[&me].name
            ),
        };
        st.threads.get_mut(&next).unwrap().status = Status::Running;
        st.current = next;
        let next_token = st.threads[&next].token.clone();
        drop(st);
        next_token.grant();
    }

    /// Block until `thread` finishes, returning its exit status. Only
    /// permitted on joinable threads; `None` if the thread is already gone.
    pub fn join(&self, thread: Tid) -> Option<i32> {
        let port = {
            let st = lock(&self.state);
            let tcb = st.threads.get(&thread)?;
            assert!(tcb.joinable, "join on a non-joinable thread");
            tcb.join_port.clone()
        };
        port.map(|p| p.receive())
    }

    // ------------------------------------------------------------------
    // Context switch internals
    // ------------------------------------------------------------------

    fn switch_to(&self, mut st: std::sync::MutexGuard<'_, ManagerState>, next: Tid) {
        let me = st.current;
        debug_assert_ne!(me, next);
        self.save_user_context(&mut st, me);
        st.threads.get_mut(&next).unwrap().status = Status::Running;
        st.current = next;
        let next_token = st.threads[&next].token.clone();
        let my_token = st.threads[&me].token.clone();
        drop(st);
        next_token.grant();
        my_token.wait();
        self.after_resume();
    }

    /// Runs on every freshly dispatched thread: reap the previous thread
    /// if it finished, and reinstall our user context.
    fn after_resume(&self) {
        let dead = {
            let mut st = lock(&self.state);
            let dead = st
                .to_destroy
                .take()
                .and_then(|t| st.threads.remove(&t));
            let me = st.current;
            self.restore_user_context(&mut st, me);
            dead
        };
        // Dropped outside the manager lock: the control block may own open
        // files or an address space whose teardown performs disk I/O.
        drop(dead);
    }

    fn save_user_context(&self, st: &mut ManagerState, thread: Tid) {
        let Some(machine) = self.machine.get() else {
            return;
        };
        let tcb = st.threads.get_mut(&thread).unwrap();
        if tcb.user_regs.is_some() {
            tcb.user_regs = Some(machine.user_regs());
            if let Some(space) = &tcb.space {
                space.save_state(machine);
            }
        }
    }

    fn restore_user_context(&self, st: &mut ManagerState, thread: Tid) {
        let Some(machine) = self.machine.get() else {
            return;
        };
        let Some(tcb) = st.threads.get(&thread) else {
            return;
        };
        if let Some(regs) = &tcb.user_regs {
            machine.set_user_regs(regs);
            if let Some(space) = &tcb.space {
                space.restore_state(machine);
            }
        }
    }

    // ------------------------------------------------------------------
    // Priority donation
    // ------------------------------------------------------------------

    /// Raise a thread's priority (never lowers). A ready thread moves to
    /// the queue matching its new priority.
    pub(crate) fn promote(&self, thread: Tid, new_priority: u32) {
        let mut st = lock(&self.state);
        let Some(tcb) = st.threads.get_mut(&thread) else {
            return;
        };
        if new_priority <= tcb.priority {
            return;
        }
        let old = tcb.priority;
        tcb.priority = new_priority;
        debug!(
            "promoted thread '{}' from priority {} to {}",
            tcb.name, old, new_priority
        );
        if tcb.status == Status::Ready {
            st.scheduler.requeue(thread, old, new_priority);
        }
    }

    /// Restore the caller's original priority after releasing a lock.
    pub(crate) fn demote_current(&self) {
        let mut st = lock(&self.state);
        let me = st.current;
        let tcb = st.threads.get_mut(&me).unwrap();
        tcb.priority = tcb.original_priority;
    }

    pub fn priority_of(&self, thread: Tid) -> Option<u32> {
        lock(&self.state).threads.get(&thread).map(|t| t.priority)
    }

    pub fn is_joinable(&self, thread: Tid) -> Option<bool> {
        lock(&self.state).threads.get(&thread).map(|t| t.joinable)
    }

    /// Take the caller's join port, leaving none behind; used by the
    /// termination paths so the rendezvous happens exactly once.
    pub(crate) fn take_current_join_port(&self) -> Option<Arc<Port>> {
        let me = self.current();
        lock(&self.state)
            .threads
            .get_mut(&me)
            .and_then(|t| t.join_port.take())
    }

    pub fn status_of(&self, thread: Tid) -> Option<Status> {
        lock(&self.state).threads.get(&thread).map(|t| t.status)
    }

    // ------------------------------------------------------------------
    // Per-thread attachments
    // ------------------------------------------------------------------

    pub fn current_path(&self) -> FilePath {
        let me = self.current();
        lock(&self.state).threads[&me].cwd.clone()
    }

    pub fn set_current_path(&self, path: FilePath) {
        let me = self.current();
        lock(&self.state).threads.get_mut(&me).unwrap().cwd = path;
    }

    pub fn current_space(&self) -> Option<Arc<AddressSpace>> {
        let me = self.current();
        lock(&self.state).threads[&me].space.clone()
    }

    pub fn set_current_space(&self, space: Option<Arc<AddressSpace>>) {
        let me = self.current();
        let old = {
            let mut st = lock(&self.state);
            std::mem::replace(&mut st.threads.get_mut(&me).unwrap().space, space)
        };
        // dropped outside the manager lock; a dying space tears down its
        // swap file through the file system
        drop(old);
    }

    pub fn take_current_space(&self) -> Option<Arc<AddressSpace>> {
        let me = self.current();
        lock(&self.state).threads.get_mut(&me).unwrap().space.take()
    }

    pub fn current_space_id(&self) -> Option<SpaceId> {
        let me = self.current();
        lock(&self.state).threads[&me].space_id
    }

    /// Run `f` on the caller's open-file table, creating it on first use.
    pub fn with_current_files<R>(&self, f: impl FnOnce(&mut FileTable) -> R) -> R {
        let me = self.current();
        let mut st = lock(&self.state);
        let tcb = st.threads.get_mut(&me).unwrap();
        f(tcb.files.get_or_insert_with(FileTable::new))
    }

    /// Take the caller's open-file table, closing nothing yet; dropping
    /// the returned table closes every file in it.
    pub fn take_current_files(&self) -> Option<FileTable> {
        let me = self.current();
        lock(&self.state).threads.get_mut(&me).unwrap().files.take()
    }
}
