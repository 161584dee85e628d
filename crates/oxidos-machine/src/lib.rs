//! The simulated hardware the kernel runs against.
//!
//! The instruction interpreter itself is external; this crate provides the
//! surface the kernel consumes from it: the register file and exception
//! registry, the MMU (linear page table or TLB), physical memory, the raw
//! sector disk, and the character console. `ScriptedCpu` is a stand-in
//! interpreter that replays a fixed trap sequence, enough to drive the
//! system-call layer end to end.

pub mod console;
pub mod disk;
pub mod error;
pub mod machine;
pub mod mmu;
pub mod scripted;

pub use console::*;
pub use disk::*;
pub use error::*;
pub use machine::*;
pub use mmu::*;
pub use scripted::*;
