use oxidos_layout::LayoutError;
use oxidos_machine::{DiskError, MachineError};
use thiserror::Error;

/// File-system failures. These are surfaced to callers (and forwarded to
/// user programs as `-1`/`0` results); none of them is fatal to the kernel.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("path not found")]
    NotFound,

    #[error("path component is not a directory")]
    NotADirectory,

    #[error("path names a directory")]
    IsADirectory,

    #[error("name already exists")]
    AlreadyExists,

    #[error("directory is not empty")]
    NotEmpty,

    #[error("the root directory cannot be created or removed")]
    Root,

    #[error("name longer than the on-disk limit")]
    NameTooLong,

    #[error("no free sectors left on disk")]
    DiskFull,

    #[error("file larger than the header layout allows")]
    TooLarge,

    #[error("file is pending removal")]
    PendingRemoval,

    #[error("disk image is not formatted")]
    Unformatted,

    #[error("disk: {0}")]
    Disk(#[from] DiskError),

    #[error("layout: {0}")]
    Layout(#[from] LayoutError),
}

/// Virtual-memory failures: a bad executable, an address space that cannot
/// be backed, or a reference outside the space.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("no free frames")]
    OutOfFrames,

    #[error("address space of {pages} pages does not fit")]
    TooBig { pages: u32 },

    #[error("virtual page {vpn} outside the address space")]
    BadAddress { vpn: u32 },

    #[error("bad executable: {0}")]
    BadExecutable(#[from] LayoutError),

    #[error("file system: {0}")]
    Fs(#[from] FsError),

    #[error("machine: {0}")]
    Machine(#[from] MachineError),
}

/// Failures while copying between user space and the kernel.
#[derive(Debug, Error)]
pub enum UserMemError {
    #[error("null user pointer")]
    NullPointer,

    #[error("user string longer than {max} bytes")]
    TooLong { max: usize },

    #[error("user string is not valid UTF-8")]
    NotUtf8,

    #[error("unresolved fault at {addr:#x}")]
    Fault { addr: u32 },
}
