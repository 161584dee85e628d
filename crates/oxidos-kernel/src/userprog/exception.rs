//! Entry points from user programs into the kernel: the trap dispatcher
//! decodes system calls, services page faults, and turns user faults into
//! thread termination. The kernel itself never dies on a user fault.

use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use oxidos_machine::{Exception, ExceptionHandler, Machine, ARG_REGS};

use crate::threads::ForkOptions;
use crate::userprog::args::write_args;
use crate::userprog::process::SpaceId;
use crate::userprog::syscall::{
    Syscall, CONSOLE_INPUT, CONSOLE_OUTPUT, MAX_PATH_LEN,
};
use crate::userprog::transfer::{
    read_buffer_from_user, read_string_from_user, read_word_from_user, write_buffer_to_user,
};
use crate::Kernel;

pub struct TrapDispatcher {
    kernel: Weak<Kernel>,
}

impl TrapDispatcher {
    pub fn new(kernel: &Arc<Kernel>) -> Arc<Self> {
        Arc::new(Self {
            kernel: Arc::downgrade(kernel),
        })
    }
}

impl ExceptionHandler for TrapDispatcher {
    fn handle(&self, machine: &Machine, which: Exception) {
        let Some(kernel) = self.kernel.upgrade() else {
            return;
        };
        match which {
            Exception::Syscall => handle_syscall(&kernel, machine),
            Exception::PageFault => handle_page_fault(&kernel),
            Exception::NoException => panic!("spurious no-exception trap"),
            fault => {
                error!(
                    "user fault {:?} at {:#x} in thread '{}': terminating",
                    fault,
                    machine.bad_vaddr(),
                    kernel.threads.current_name()
                );
                terminate_current(&kernel, -1);
            }
        }
    }
}

fn handle_page_fault(kernel: &Arc<Kernel>) {
    #[cfg(feature = "demand-loading")]
    {
        if let Err(e) = kernel.tlb.handle_fault(kernel) {
            error!(
                "unservable page fault in thread '{}': {}",
                kernel.threads.current_name(),
                e
            );
            terminate_current(kernel, -1);
        }
    }
    #[cfg(not(feature = "demand-loading"))]
    {
        error!(
            "page fault in eagerly loaded thread '{}': terminating",
            kernel.threads.current_name()
        );
        terminate_current(kernel, -1);
    }
}

fn handle_syscall(kernel: &Arc<Kernel>, machine: &Machine) {
    let call = match Syscall::from_registers(machine) {
        Ok(call) => call,
        // an unknown id is a toolchain/kernel mismatch, not user data
        Err(e) => panic!("{e}"),
    };
    debug!("syscall {:?} from '{}'", call, kernel.threads.current_name());

    let result = match call {
        Syscall::Halt => {
            info!("machine halt requested by user program");
            kernel.machine.halt();
            return;
        }
        Syscall::Exit { status } => terminate_current(kernel, status),
        Syscall::Exec {
            path,
            argv,
            joinable,
        } => do_exec(kernel, machine, path, argv, joinable),
        Syscall::Join { space } => do_join(kernel, space),
        Syscall::Create { path } => do_create(kernel, machine, path),
        Syscall::Open { path } => do_open(kernel, machine, path),
        Syscall::Read { buf, len, fid } => do_read(kernel, machine, buf, len, fid),
        Syscall::Write { buf, len, fid } => do_write(kernel, machine, buf, len, fid),
        Syscall::Close { fid } => do_close(kernel, fid),
    };
    Syscall::encode_result(machine, result);
    machine.advance_pc();
}

/// Tear down the calling user thread: frames, open files and the process
/// identity, with the join rendezvous first so a parent still collects
/// the exit status.
pub fn terminate_current(kernel: &Kernel, status: i32) -> ! {
    if let Some(port) = kernel.threads.take_current_join_port() {
        port.send(status);
    }
    if let Some(space) = kernel.threads.take_current_space() {
        #[cfg(feature = "demand-loading")]
        kernel.core_map.release_pages(&space);
        drop(space);
    }
    drop(kernel.threads.take_current_files());
    if let Some(id) = kernel.threads.current_space_id() {
        kernel.process.remove(id);
    }
    kernel.threads.finish(status)
}

fn do_create(kernel: &Arc<Kernel>, machine: &Machine, path: u32) -> i32 {
    let path = match read_string_from_user(machine, path, MAX_PATH_LEN) {
        Ok(s) => s,
        Err(e) => {
            debug!("create: bad path argument: {}", e);
            return 0;
        }
    };
    match kernel.fs.create(&path, 0, false) {
        Ok(()) => 1,
        Err(e) => {
            debug!("create '{}' failed: {}", path, e);
            0
        }
    }
}

fn do_open(kernel: &Arc<Kernel>, machine: &Machine, path: u32) -> i32 {
    let path = match read_string_from_user(machine, path, MAX_PATH_LEN) {
        Ok(s) => s,
        Err(e) => {
            debug!("open: bad path argument: {}", e);
            return -1;
        }
    };
    let file = match kernel.fs.open(&path) {
        Ok(f) => f,
        Err(e) => {
            debug!("open '{}' failed: {}", path, e);
            return -1;
        }
    };
    match kernel.threads.with_current_files(|files| files.add(file)) {
        Ok(fid) => fid as i32,
        Err(file) => {
            debug!("open '{}' failed: file table full", path);
            // closed here, outside the thread-manager lock
            drop(file);
            -1
        }
    }
}

fn do_read(kernel: &Arc<Kernel>, machine: &Machine, buf: u32, len: u32, fid: u32) -> i32 {
    if len == 0 {
        return 0;
    }
    if buf == 0 {
        return -1;
    }
    if fid == CONSOLE_INPUT {
        let mut data = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let c = kernel.console.get_char();
            if c == b'\n' {
                break;
            }
            data.push(c);
        }
        return match write_buffer_to_user(machine, &data, buf) {
            Ok(()) => data.len() as i32,
            Err(_) => -1,
        };
    }

    let Some(handle) = kernel.threads.with_current_files(|files| files.get(fid)) else {
        return -1;
    };
    let mut kbuf = vec![0u8; len as usize];
    let n = {
        let mut file = handle.lock().unwrap_or_else(|e| e.into_inner());
        match file.read(&mut kbuf) {
            Ok(n) => n,
            Err(e) => {
                debug!("read on fid {} failed: {}", fid, e);
                return -1;
            }
        }
    };
    match write_buffer_to_user(machine, &kbuf[..n], buf) {
        Ok(()) => n as i32,
        Err(_) => -1,
    }
}

fn do_write(kernel: &Arc<Kernel>, machine: &Machine, buf: u32, len: u32, fid: u32) -> i32 {
    if len == 0 {
        return 0;
    }
    let mut kbuf = vec![0u8; len as usize];
    if read_buffer_from_user(machine, buf, &mut kbuf).is_err() {
        return -1;
    }
    if fid == CONSOLE_OUTPUT {
        for &c in &kbuf {
            kernel.console.put_char(c);
        }
        return len as i32;
    }

    let Some(handle) = kernel.threads.with_current_files(|files| files.get(fid)) else {
        return -1;
    };
    let mut file = handle.lock().unwrap_or_else(|e| e.into_inner());
    match file.write(&kbuf) {
        Ok(n) => n as i32,
        Err(e) => {
            debug!("write on fid {} failed: {}", fid, e);
            -1
        }
    }
}

fn do_close(kernel: &Arc<Kernel>, fid: u32) -> i32 {
    let handle = kernel.threads.with_current_files(|files| files.remove(fid));
    match handle {
        // dropped here, outside the thread-manager lock: closing may
        // perform the deferred on-disk delete
        Some(handle) => {
            drop(handle);
            1
        }
        None => 0,
    }
}

fn do_join(kernel: &Arc<Kernel>, space: u32) -> i32 {
    let Some(tid) = kernel.process.get(SpaceId(space)) else {
        return -1;
    };
    if kernel.threads.is_joinable(tid) != Some(true) {
        return -1;
    }
    kernel.threads.join(tid).unwrap_or(-1)
}

fn do_exec(kernel: &Arc<Kernel>, machine: &Machine, path: u32, argv: u32, joinable: bool) -> i32 {
    let path = match read_string_from_user(machine, path, MAX_PATH_LEN) {
        Ok(s) => s,
        Err(e) => {
            debug!("exec: bad path argument: {}", e);
            return -1;
        }
    };
    let exe = match kernel.fs.open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!("exec '{}': cannot open executable: {}", path, e);
            return -1;
        }
    };

    // argv is read in the parent's space, before the child exists
    let mut args = Vec::new();
    if argv != 0 {
        loop {
            let slot = argv + 4 * args.len() as u32;
            let ptr = match read_word_from_user(machine, slot) {
                Ok(p) => p,
                Err(_) => return -1,
            };
            if ptr == 0 {
                break;
            }
            match read_string_from_user(machine, ptr, MAX_PATH_LEN) {
                Ok(s) => args.push(s),
                Err(_) => return -1,
            }
        }
    }

    let space_id = kernel.process.reserve();
    let space = match kernel.create_space(exe, space_id) {
        Ok(space) => space,
        Err(e) => {
            warn!("exec '{}': {}", path, e);
            kernel.process.remove(space_id);
            return -1;
        }
    };

    let regs = space.initial_user_regs();
    let child_kernel = Arc::clone(kernel);
    let tid = kernel.threads.fork_with(
        &path,
        ForkOptions {
            priority: 0,
            joinable,
            space: Some(space),
            space_id: Some(space_id),
            user_regs: Some(regs),
        },
        move || user_thread_body(child_kernel, args),
    );
    kernel.process.bind(space_id, tid);
    info!("exec '{}' as space {}", path, space_id);
    space_id.0 as i32
}

/// Body of an exec'd thread: marshal the arguments, hand the machine to
/// the interpreter, and exit when it returns.
fn user_thread_body(kernel: Arc<Kernel>, args: Vec<String>) {
    let machine = kernel.machine.as_ref();
    match write_args(machine, &args) {
        Ok((argc, argv)) => {
            machine.write_reg(ARG_REGS[0], argc);
            machine.write_reg(ARG_REGS[1], argv);
        }
        Err(e) => {
            error!("argument marshalling failed: {}", e);
            terminate_current(&kernel, -1);
        }
    }
    if let Some(cpu) = kernel.cpu.clone() {
        machine.run(cpu.as_ref());
    }
    terminate_current(&kernel, 0);
}
