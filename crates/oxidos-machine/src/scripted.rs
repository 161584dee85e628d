use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::machine::{Cpu, Exception, Machine, ARG_REGS, RETVAL_REG};

/// One step of a scripted user program.
#[derive(Debug, Clone)]
pub enum ScriptOp {
    SetReg(usize, u32),
    Trap(Exception),
}

/// Replays a fixed sequence of register writes and traps. Stands in for the
/// external instruction interpreter so the system-call layer can be driven
/// end to end: a "program" is the sequence of traps it would have produced.
pub struct ScriptedCpu {
    ops: Mutex<VecDeque<ScriptOp>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ScriptedCpu {
    pub fn new(ops: Vec<ScriptOp>) -> Self {
        Self {
            ops: Mutex::new(ops.into()),
        }
    }

    /// Convenience: a script that issues the given system calls in order.
    pub fn from_syscalls(calls: Vec<(u32, [u32; 4])>) -> Self {
        let mut ops = Vec::new();
        for (id, args) in calls {
            ops.push(ScriptOp::SetReg(RETVAL_REG, id));
            for (reg, value) in ARG_REGS.iter().zip(args) {
                ops.push(ScriptOp::SetReg(*reg, value));
            }
            ops.push(ScriptOp::Trap(Exception::Syscall));
        }
        Self::new(ops)
    }
}

impl Cpu for ScriptedCpu {
    fn step(&self, machine: &Machine) -> bool {
        let op = match lock(&self.ops).pop_front() {
            Some(op) => op,
            None => return false,
        };
        match op {
            ScriptOp::SetReg(reg, value) => machine.write_reg(reg, value),
            ScriptOp::Trap(which) => machine.raise(which),
        }
        true
    }
}
