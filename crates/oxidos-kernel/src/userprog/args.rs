//! Argument marshalling for user programs: the argv strings are laid out
//! below the new thread's stack pointer, followed by the pointer array,
//! and the stack pointer is pulled down past them.

use oxidos_machine::{Machine, STACK_REG};

use crate::error::UserMemError;
use crate::userprog::transfer::write_buffer_to_user;

/// Write `args` into the current user stack. Returns `(argc, argv)` for
/// the program's entry registers; the machine's stack pointer is left
/// below the marshalled data with a little headroom.
pub fn write_args(machine: &Machine, args: &[String]) -> Result<(u32, u32), UserMemError> {
    let mut sp = machine.read_reg(STACK_REG);
    let mut pointers = Vec::with_capacity(args.len());

    for arg in args {
        sp -= arg.len() as u32 + 1;
        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        write_buffer_to_user(machine, &bytes, sp)?;
        pointers.push(sp);
    }

    sp &= !3; // word-align the pointer array
    sp -= 4 * (pointers.len() as u32 + 1);
    let argv = sp;
    let mut array = Vec::with_capacity(4 * (pointers.len() + 1));
    for p in &pointers {
        array.extend_from_slice(&p.to_le_bytes());
    }
    array.extend_from_slice(&0u32.to_le_bytes()); // NULL terminator
    write_buffer_to_user(machine, &array, argv)?;

    machine.write_reg(STACK_REG, sp - 16);
    Ok((pointers.len() as u32, argv))
}
