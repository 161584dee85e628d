//! Byte-at-a-time copies between user space and the kernel.
//!
//! A memory access can fail on a TLB miss; the copy helpers raise the
//! fault into the registered handler and retry the access once. A second
//! failure is reported to the caller, which terminates the offending
//! thread or fails the system call.

use oxidos_machine::{Exception, Machine, MachineError};

use crate::error::UserMemError;

fn read_byte(machine: &Machine, addr: u32) -> Result<u8, UserMemError> {
    match machine.read_mem(addr, 1) {
        Ok(v) => Ok(v as u8),
        Err(MachineError::PageFault { .. }) => {
            machine.raise(Exception::PageFault);
            machine
                .read_mem(addr, 1)
                .map(|v| v as u8)
                .map_err(|_| UserMemError::Fault { addr })
        }
        Err(_) => Err(UserMemError::Fault { addr }),
    }
}

fn write_byte(machine: &Machine, addr: u32, value: u8) -> Result<(), UserMemError> {
    match machine.write_mem(addr, 1, value as u32) {
        Ok(()) => Ok(()),
        Err(MachineError::PageFault { .. }) => {
            machine.raise(Exception::PageFault);
            machine
                .write_mem(addr, 1, value as u32)
                .map_err(|_| UserMemError::Fault { addr })
        }
        Err(_) => Err(UserMemError::Fault { addr }),
    }
}

/// Copy a buffer out of user space.
pub fn read_buffer_from_user(
    machine: &Machine,
    addr: u32,
    buf: &mut [u8],
) -> Result<(), UserMemError> {
    if addr == 0 {
        return Err(UserMemError::NullPointer);
    }
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = read_byte(machine, addr + i as u32)?;
    }
    Ok(())
}

/// Copy a NUL-terminated string out of user space, rejecting strings
/// longer than `max` bytes.
pub fn read_string_from_user(
    machine: &Machine,
    addr: u32,
    max: usize,
) -> Result<String, UserMemError> {
    if addr == 0 {
        return Err(UserMemError::NullPointer);
    }
    let mut bytes = Vec::new();
    loop {
        let b = read_byte(machine, addr + bytes.len() as u32)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
        if bytes.len() > max {
            return Err(UserMemError::TooLong { max });
        }
    }
    String::from_utf8(bytes).map_err(|_| UserMemError::NotUtf8)
}

/// Copy a buffer into user space.
pub fn write_buffer_to_user(
    machine: &Machine,
    buf: &[u8],
    addr: u32,
) -> Result<(), UserMemError> {
    if addr == 0 {
        return Err(UserMemError::NullPointer);
    }
    for (i, &byte) in buf.iter().enumerate() {
        write_byte(machine, addr + i as u32, byte)?;
    }
    Ok(())
}

/// Read a user word (for walking argv pointer arrays).
pub fn read_word_from_user(machine: &Machine, addr: u32) -> Result<u32, UserMemError> {
    if addr == 0 {
        return Err(UserMemError::NullPointer);
    }
    let mut raw = [0u8; 4];
    read_buffer_from_user(machine, addr, &mut raw)?;
    Ok(u32::from_le_bytes(raw))
}
