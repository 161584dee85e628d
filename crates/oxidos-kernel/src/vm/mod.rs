//! User address spaces: page tables, the executable loader, and (with
//! demand loading) the core map and TLB fault handler.

pub mod addr_space;

#[cfg(feature = "demand-loading")]
pub mod core_map;
#[cfg(feature = "demand-loading")]
pub mod tlb;

#[cfg(not(feature = "demand-loading"))]
pub mod frames;

/// Bytes of user stack provisioned above the loaded segments.
pub const USER_STACK_SIZE: usize = 256;
