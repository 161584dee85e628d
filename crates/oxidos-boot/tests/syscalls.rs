//! Drive the system-call layer the way the interpreter would: set the
//! registers, raise the trap, and look at the result register. These run
//! under the default (eager) paging build; the machine then uses a linear
//! page table, which the tests install directly for the main thread.

#![cfg(not(feature = "demand-loading"))]

use std::sync::Arc;

use oxidos_boot::{boot, BootOptions, System};
use oxidos_kernel::userprog::process::SpaceId;
use oxidos_layout::{ExecHeader, ExecSegment, EXEC_HEADER_SIZE, EXEC_MAGIC};
use oxidos_machine::{
    ConsoleSink, Exception, ScriptedCpu, TranslationEntry, ARG_REGS, NUM_PHYS_PAGES, RETVAL_REG,
};
use tempfile::TempDir;

fn booted(cpu: Option<Arc<ScriptedCpu>>) -> (System, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut opts = BootOptions::new(dir.path().join("DISK"))
        .format(true)
        .console_sink(ConsoleSink::Buffer(Vec::new()));
    if let Some(cpu) = cpu {
        opts = opts.cpu(cpu);
    }
    (boot(opts).unwrap(), dir)
}

/// Give the main thread a few identity-mapped pages of user memory.
fn install_user_pages(system: &System, pages: u32) {
    let table = (0..pages)
        .map(|vpn| TranslationEntry {
            virtual_page: vpn,
            physical_page: vpn,
            valid: true,
            used: false,
            dirty: false,
            read_only: false,
        })
        .collect();
    system.kernel.machine.set_page_table(table);
}

fn put_string(system: &System, addr: u32, s: &str) {
    for (i, b) in s.bytes().chain([0]).enumerate() {
        system
            .kernel
            .machine
            .write_mem(addr + i as u32, 1, b as u32)
            .unwrap();
    }
}

fn syscall(system: &System, id: u32, args: [u32; 4]) -> i32 {
    let machine = &system.kernel.machine;
    machine.write_reg(RETVAL_REG, id);
    for (reg, value) in ARG_REGS.iter().zip(args) {
        machine.write_reg(*reg, value);
    }
    machine.raise(Exception::Syscall);
    machine.read_reg(RETVAL_REG) as i32
}

const SC_EXEC: u32 = 3;
const SC_JOIN: u32 = 4;
const SC_CREATE: u32 = 5;
const SC_OPEN: u32 = 6;
const SC_READ: u32 = 7;
const SC_WRITE: u32 = 8;
const SC_CLOSE: u32 = 9;

#[test]
fn create_open_write_read_close_round_trip() {
    let (system, _dir) = booted(None);
    install_user_pages(&system, 6);

    put_string(&system, 0x10, "/notes");
    assert_eq!(syscall(&system, SC_CREATE, [0x10, 0, 0, 0]), 1);
    // duplicate create fails
    assert_eq!(syscall(&system, SC_CREATE, [0x10, 0, 0, 0]), 0);

    let fid = syscall(&system, SC_OPEN, [0x10, 0, 0, 0]);
    assert!(fid >= 2, "fid was {fid}");

    // write a buffer placed in user memory
    let data = b"written through the trap layer";
    for (i, &b) in data.iter().enumerate() {
        system
            .kernel
            .machine
            .write_mem(0x100 + i as u32, 1, b as u32)
            .unwrap();
    }
    assert_eq!(
        syscall(&system, SC_WRITE, [0x100, data.len() as u32, fid as u32, 0]),
        data.len() as i32
    );

    // reopen to rewind, then read back into a different buffer
    let fid2 = syscall(&system, SC_OPEN, [0x10, 0, 0, 0]);
    assert!(fid2 >= 2);
    assert_eq!(
        syscall(&system, SC_READ, [0x200, data.len() as u32, fid2 as u32, 0]),
        data.len() as i32
    );
    for (i, &b) in data.iter().enumerate() {
        let got = system.kernel.machine.read_mem(0x200 + i as u32, 1).unwrap();
        assert_eq!(got as u8, b, "byte {i}");
    }

    assert_eq!(syscall(&system, SC_CLOSE, [fid as u32, 0, 0, 0]), 1);
    assert_eq!(syscall(&system, SC_CLOSE, [fid as u32, 0, 0, 0]), 0);
    assert_eq!(syscall(&system, SC_CLOSE, [fid2 as u32, 0, 0, 0]), 1);
}

#[test]
fn bad_arguments_fail_without_damage() {
    let (system, _dir) = booted(None);
    install_user_pages(&system, 2);

    // null path pointers
    assert_eq!(syscall(&system, SC_CREATE, [0, 0, 0, 0]), 0);
    assert_eq!(syscall(&system, SC_OPEN, [0, 0, 0, 0]), -1);

    // missing file
    put_string(&system, 0x10, "/absent");
    assert_eq!(syscall(&system, SC_OPEN, [0x10, 0, 0, 0]), -1);

    // console read into a null buffer
    assert_eq!(syscall(&system, SC_READ, [0, 8, 0, 0]), -1);

    // unknown file id
    assert_eq!(syscall(&system, SC_READ, [0x40, 4, 9, 0]), -1);
    assert_eq!(syscall(&system, SC_CLOSE, [9, 0, 0, 0]), 0);
}

#[test]
fn console_ids_route_through_the_bridge() {
    let (system, _dir) = booted(None);
    install_user_pages(&system, 4);

    // write fid 1 → console output
    let msg = b"hello, console";
    for (i, &b) in msg.iter().enumerate() {
        system
            .kernel
            .machine
            .write_mem(0x80 + i as u32, 1, b as u32)
            .unwrap();
    }
    assert_eq!(
        syscall(&system, SC_WRITE, [0x80, msg.len() as u32, 1, 0]),
        msg.len() as i32
    );
    assert_eq!(system.console_device.take_output(), msg);

    // read fid 0 ← console input, stopping at the newline
    system.console_device.feed_input(b"typed\nrest");
    assert_eq!(syscall(&system, SC_READ, [0x100, 32, 0, 0]), 5);
    for (i, &b) in b"typed".iter().enumerate() {
        let got = system.kernel.machine.read_mem(0x100 + i as u32, 1).unwrap();
        assert_eq!(got as u8, b);
    }
}

/// Build an executable image in the file system: header plus a code
/// segment of patterned bytes.
fn make_executable(system: &System, path: &str, code_len: u32) {
    let header = ExecHeader {
        magic: EXEC_MAGIC,
        code: ExecSegment {
            virtual_addr: 0,
            in_file_addr: EXEC_HEADER_SIZE as u32,
            size: code_len,
        },
        init_data: ExecSegment::default(),
        uninit_data: ExecSegment::default(),
    };
    let mut image = header_bytes(&header);
    image.extend((0..code_len).map(|i| (i % 251) as u8));

    system.kernel.fs.create(path, 0, false).unwrap();
    let mut file = system.kernel.fs.open(path).unwrap();
    file.write(&image).unwrap();
}

fn header_bytes(header: &ExecHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXEC_HEADER_SIZE);
    out.extend_from_slice(&header.magic.to_le_bytes());
    for seg in [&header.code, &header.init_data, &header.uninit_data] {
        out.extend_from_slice(&seg.virtual_addr.to_le_bytes());
        out.extend_from_slice(&seg.in_file_addr.to_le_bytes());
        out.extend_from_slice(&seg.size.to_le_bytes());
    }
    out
}

#[test]
fn exec_join_exit_round_trip() {
    // the child "program" is a script that immediately exits with 7
    let cpu = Arc::new(ScriptedCpu::from_syscalls(vec![(2, [7, 0, 0, 0])]));
    let (system, _dir) = booted(Some(cpu));
    install_user_pages(&system, 4);

    make_executable(&system, "/child", 64);
    let frames_before = system.kernel.frames.free_count();

    put_string(&system, 0x10, "/child");
    // args: path, argv (none), joinable
    let space = syscall(&system, SC_EXEC, [0x10, 0, 1, 0]);
    assert!(space >= 0, "exec failed: {space}");

    // join blocks until the child's exit, then yields its status
    assert_eq!(syscall(&system, SC_JOIN, [space as u32, 0, 0, 0]), 7);

    // let the child finish tearing down, then check everything came back
    system.kernel.threads.yield_now();
    system.kernel.threads.yield_now();
    assert_eq!(system.kernel.process.get(SpaceId(space as u32)), None);
    assert_eq!(system.kernel.frames.free_count(), frames_before);
    assert!(system.kernel.frames.free_count() <= NUM_PHYS_PAGES);

    // joining again reports failure
    assert_eq!(syscall(&system, SC_JOIN, [space as u32, 0, 0, 0]), -1);
}

#[test]
fn exec_of_garbage_fails() {
    let (system, _dir) = booted(None);
    install_user_pages(&system, 2);

    system.kernel.fs.create("/junk", 0, false).unwrap();
    system
        .kernel
        .fs
        .open("/junk")
        .unwrap()
        .write(b"not an executable at all")
        .unwrap();

    put_string(&system, 0x10, "/junk");
    assert_eq!(syscall(&system, SC_EXEC, [0x10, 0, 0, 0]), -1);
    put_string(&system, 0x10, "/missing");
    assert_eq!(syscall(&system, SC_EXEC, [0x10, 0, 0, 0]), -1);
}
