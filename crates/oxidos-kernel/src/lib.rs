//! Kernel core of an instructional operating system running against a
//! simulated MIPS-convention machine.
//!
//! Four subsystems, stacked: the cooperative thread kernel with priority
//! scheduling and donation (`threads`), the hierarchical file system with
//! per-directory reader/writer locking (`fs`), user address spaces with
//! eager or demand-loaded translation (`vm`, selected by cargo feature),
//! and the system-call layer (`userprog`).
//!
//! `Kernel` is the context built once at boot and threaded through every
//! component; there are no other globals.

pub mod error;
pub mod fs;
pub mod threads;
pub mod userprog;
pub mod vm;

mod util;

use std::sync::Arc;

use oxidos_machine::{Cpu, Exception, Machine, TranslationMode};

pub use error::{FsError, UserMemError, VmError};
pub use threads::{ThreadKernel, Tid};

use fs::open_file::OpenFile;
use fs::FileSystem;
use userprog::console::SynchConsole;
use userprog::exception::TrapDispatcher;
use userprog::process::{ProcessTable, SpaceId};
use vm::addr_space::AddressSpace;

#[cfg(feature = "demand-loading")]
use vm::{core_map::CoreMap, tlb::TlbHandler};

#[cfg(not(feature = "demand-loading"))]
use vm::frames::FrameAllocator;

/// Which translation structure the machine must be built with to match
/// this kernel's compiled paging strategy.
pub fn translation_mode() -> TranslationMode {
    if cfg!(feature = "demand-loading") {
        TranslationMode::Tlb
    } else {
        TranslationMode::PageTable
    }
}

/// The kernel context: one of everything, built at boot.
pub struct Kernel {
    pub threads: Arc<ThreadKernel>,
    pub machine: Arc<Machine>,
    pub fs: Arc<FileSystem>,
    pub console: Arc<SynchConsole>,
    pub process: ProcessTable,
    /// Instruction interpreter driving exec'd programs, when present.
    pub cpu: Option<Arc<dyn Cpu>>,

    #[cfg(not(feature = "demand-loading"))]
    pub frames: Arc<FrameAllocator>,
    #[cfg(feature = "demand-loading")]
    pub core_map: CoreMap,
    #[cfg(feature = "demand-loading")]
    pub tlb: TlbHandler,
}

impl Kernel {
    pub fn new(
        threads: Arc<ThreadKernel>,
        machine: Arc<Machine>,
        fs: Arc<FileSystem>,
        console: Arc<SynchConsole>,
        cpu: Option<Arc<dyn Cpu>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            threads,
            machine,
            fs,
            console,
            process: ProcessTable::new(),
            cpu,
            #[cfg(not(feature = "demand-loading"))]
            frames: Arc::new(FrameAllocator::new()),
            #[cfg(feature = "demand-loading")]
            core_map: CoreMap::new(),
            #[cfg(feature = "demand-loading")]
            tlb: TlbHandler::new(),
        })
    }

    /// Register the trap dispatcher for every exception kind.
    pub fn install_handlers(self: &Arc<Self>) {
        let dispatcher = TrapDispatcher::new(self);
        for which in [
            Exception::NoException,
            Exception::Syscall,
            Exception::PageFault,
            Exception::ReadOnly,
            Exception::BusError,
            Exception::AddressError,
            Exception::Overflow,
            Exception::IllegalInstruction,
        ] {
            self.machine.set_handler(which, dispatcher.clone());
        }
    }

    /// Build an address space for `exe` under the compiled paging
    /// strategy.
    pub fn create_space(
        self: &Arc<Self>,
        exe: OpenFile,
        space_id: SpaceId,
    ) -> Result<Arc<AddressSpace>, VmError> {
        #[cfg(not(feature = "demand-loading"))]
        {
            AddressSpace::new_eager(&self.machine, &self.frames, exe, space_id)
        }
        #[cfg(feature = "demand-loading")]
        {
            AddressSpace::new_lazy(exe, space_id, &self.fs)
        }
    }

    pub fn halt(&self) {
        self.machine.halt();
    }
}
