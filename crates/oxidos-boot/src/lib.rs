//! Boot: wire the simulated machine, its devices, the thread kernel and
//! the file system into a running `Kernel` context.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::info;

use oxidos_kernel::fs::FileSystem;
use oxidos_kernel::userprog::console::SynchConsole;
use oxidos_kernel::{Kernel, ThreadKernel};
use oxidos_layout::{NUM_SECTORS, SECTOR_SIZE};
use oxidos_machine::{Console, ConsoleSink, Cpu, Disk, Machine};

pub struct BootOptions {
    pub disk_image: PathBuf,
    /// Lay down an empty file system instead of mounting.
    pub format: bool,
    pub console_sink: ConsoleSink,
    /// Instruction interpreter for exec'd user programs.
    pub cpu: Option<Arc<dyn Cpu>>,
    /// Software timer period in interrupt-gate ticks; yields when due.
    pub timer_interval: Option<u64>,
}

impl BootOptions {
    pub fn new(disk_image: impl Into<PathBuf>) -> Self {
        Self {
            disk_image: disk_image.into(),
            format: false,
            console_sink: ConsoleSink::Stdout,
            cpu: None,
            timer_interval: None,
        }
    }

    pub fn format(mut self, format: bool) -> Self {
        self.format = format;
        self
    }

    pub fn console_sink(mut self, sink: ConsoleSink) -> Self {
        self.console_sink = sink;
        self
    }

    pub fn cpu(mut self, cpu: Arc<dyn Cpu>) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn timer_interval(mut self, interval: u64) -> Self {
        self.timer_interval = Some(interval);
        self
    }
}

pub struct System {
    pub kernel: Arc<Kernel>,
    /// The raw console device, kept reachable so tests can feed input and
    /// inspect output.
    pub console_device: Arc<Console>,
}

/// Bring the system up. The calling host thread becomes the kernel's
/// main thread.
pub fn boot(opts: BootOptions) -> anyhow::Result<System> {
    let threads = ThreadKernel::new();
    let machine = Arc::new(Machine::new(oxidos_kernel::translation_mode()));
    threads.attach_machine(machine.clone());

    if let Some(interval) = opts.timer_interval {
        threads.arm_timer(interval);
    }

    let disk = Arc::new(
        Disk::open(&opts.disk_image, SECTOR_SIZE, NUM_SECTORS)
            .with_context(|| format!("opening disk image {:?}", opts.disk_image))?,
    );
    let fs = FileSystem::new(threads.clone(), disk, opts.format)
        .context("mounting the file system")?;

    let console_device = Arc::new(Console::new(opts.console_sink));
    let console = Arc::new(SynchConsole::new(&threads, console_device.clone()));

    let kernel = Kernel::new(threads, machine, fs, console, opts.cpu);
    kernel.install_handlers();
    info!("system booted");

    Ok(System {
        kernel,
        console_device,
    })
}
