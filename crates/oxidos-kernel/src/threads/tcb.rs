use std::sync::{Arc, Condvar, Mutex};

use oxidos_machine::NUM_TOTAL_REGS;

use crate::fs::path::FilePath;
use crate::threads::sync::Port;
use crate::userprog::process::{FileTable, SpaceId};
use crate::vm::addr_space::AddressSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    JustCreated,
    Ready,
    Running,
    Blocked,
}

/// The run token a host thread parks on while its kernel thread is not
/// scheduled. Granting a token is the context switch: exactly one token is
/// granted at any time, so exactly one kernel thread executes.
pub(crate) struct RunToken {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl RunToken {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn grant(&self) {
        let mut g = self.granted.lock().unwrap_or_else(|e| e.into_inner());
        *g = true;
        self.cv.notify_one();
    }

    pub(crate) fn wait(&self) {
        let mut g = self.granted.lock().unwrap_or_else(|e| e.into_inner());
        while !*g {
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
        *g = false;
    }
}

/// Per-thread control block. The manager owns all of these, keyed by `Tid`;
/// the optional fields belong to threads running user programs.
pub struct Tcb {
    pub name: String,
    pub status: Status,
    pub priority: u32,
    pub original_priority: u32,
    pub joinable: bool,
    pub(crate) join_port: Option<Arc<Port>>,
    pub(crate) token: Arc<RunToken>,

    /// Saved user register set, present iff the thread runs a user program.
    pub user_regs: Option<[u32; NUM_TOTAL_REGS]>,
    pub space: Option<Arc<AddressSpace>>,
    pub files: Option<FileTable>,
    pub space_id: Option<SpaceId>,

    /// Working directory for relative file-system paths.
    pub cwd: FilePath,
}
