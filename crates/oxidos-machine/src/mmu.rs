/// Size of a virtual page and of a physical frame, in bytes.
pub const PAGE_SIZE: usize = 128;

/// Number of physical frames of simulated main memory. Deliberately
/// small so demand paging sees real memory pressure.
pub const NUM_PHYS_PAGES: usize = 8;

/// Total bytes of simulated main memory.
pub const MEMORY_SIZE: usize = NUM_PHYS_PAGES * PAGE_SIZE;

/// Number of slots in the translation lookaside buffer.
pub const TLB_SIZE: usize = 4;

/// One virtual-to-physical translation, as kept in a page table or a TLB
/// slot. `used` and `dirty` are set by the MMU on access; with a TLB the
/// kernel is responsible for copying them back to the page table before a
/// slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: u32,
    pub physical_page: u32,
    pub valid: bool,
    pub used: bool,
    pub dirty: bool,
    pub read_only: bool,
}

impl TranslationEntry {
    pub const fn invalid() -> Self {
        Self {
            virtual_page: 0,
            physical_page: 0,
            valid: false,
            used: false,
            dirty: false,
            read_only: false,
        }
    }
}

impl Default for TranslationEntry {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Which translation structure the MMU consults.
#[derive(Debug)]
pub enum Translation {
    /// Linear page table installed by the running address space.
    PageTable(Vec<TranslationEntry>),
    /// Software-managed TLB; misses are reported as page faults for the
    /// kernel to resolve.
    Tlb([TranslationEntry; TLB_SIZE]),
}

/// Translation structure selection at machine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    PageTable,
    Tlb,
}
