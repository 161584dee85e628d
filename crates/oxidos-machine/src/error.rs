use thiserror::Error;

/// Errors surfaced by memory accesses through the MMU.
///
/// Each variant maps to one of the machine's exception kinds; the kernel
/// decides whether to service the fault (page fault with demand loading)
/// or terminate the offending thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MachineError {
    #[error("page fault at {addr:#x}")]
    PageFault { addr: u32 },

    #[error("write to read-only page at {addr:#x}")]
    ReadOnly { addr: u32 },

    #[error("address error at {addr:#x}")]
    AddressError { addr: u32 },

    #[error("bus error at {addr:#x}")]
    BusError { addr: u32 },
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("sector {0} out of range")]
    BadSector(u32),

    #[error("disk image io error: {0}")]
    Io(#[from] std::io::Error),
}
