//! System-call numbers and decoding from the machine's register
//! conventions: the call id in r2, arguments in r4-r7, the result written
//! back to r2.

use oxidos_machine::{Machine, ARG_REGS, RETVAL_REG};
use thiserror::Error;

/// File id of console input.
pub const CONSOLE_INPUT: u32 = 0;
/// File id of console output.
pub const CONSOLE_OUTPUT: u32 = 1;

/// Longest path a system call accepts, terminator excluded.
pub const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Error)]
#[error("unknown system call id {0}")]
pub struct UnknownSyscall(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Exit { status: i32 },
    Exec { path: u32, argv: u32, joinable: bool },
    Join { space: u32 },
    Create { path: u32 },
    Open { path: u32 },
    Read { buf: u32, len: u32, fid: u32 },
    Write { buf: u32, len: u32, fid: u32 },
    Close { fid: u32 },
}

impl Syscall {
    pub fn from_registers(machine: &Machine) -> Result<Self, UnknownSyscall> {
        let id = machine.read_reg(RETVAL_REG);
        let [a0, a1, a2, _a3] = ARG_REGS.map(|r| machine.read_reg(r));
        match id {
            1 => Ok(Syscall::Halt),
            2 => Ok(Syscall::Exit { status: a0 as i32 }),
            3 => Ok(Syscall::Exec {
                path: a0,
                argv: a1,
                joinable: a2 != 0,
            }),
            4 => Ok(Syscall::Join { space: a0 }),
            5 => Ok(Syscall::Create { path: a0 }),
            6 => Ok(Syscall::Open { path: a0 }),
            7 => Ok(Syscall::Read {
                buf: a0,
                len: a1,
                fid: a2,
            }),
            8 => Ok(Syscall::Write {
                buf: a0,
                len: a1,
                fid: a2,
            }),
            9 => Ok(Syscall::Close { fid: a0 }),
            other => Err(UnknownSyscall(other)),
        }
    }

    /// Write a call's result into the conventional result register.
    pub fn encode_result(machine: &Machine, value: i32) {
        machine.write_reg(RETVAL_REG, value as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidos_machine::TranslationMode;

    #[test]
    fn decodes_ids_and_arguments() {
        let m = Machine::new(TranslationMode::PageTable);
        m.write_reg(RETVAL_REG, 7);
        m.write_reg(ARG_REGS[0], 0x100);
        m.write_reg(ARG_REGS[1], 64);
        m.write_reg(ARG_REGS[2], 3);
        assert_eq!(
            Syscall::from_registers(&m).unwrap(),
            Syscall::Read {
                buf: 0x100,
                len: 64,
                fid: 3
            }
        );

        m.write_reg(RETVAL_REG, 99);
        assert!(Syscall::from_registers(&m).is_err());
    }
}
