//! Page-fault servicing for the software-managed TLB.

use std::sync::Mutex;

use log::trace;
use oxidos_machine::{PAGE_SIZE, TLB_SIZE};

use crate::error::VmError;
use crate::util::lock;
use crate::Kernel;

pub struct TlbHandler {
    next_slot: Mutex<usize>,
}

impl TlbHandler {
    pub fn new() -> Self {
        Self {
            next_slot: Mutex::new(0),
        }
    }

    /// Service the fault recorded in the machine: make the page resident
    /// and install its translation in a TLB slot, preferring invalid
    /// slots and otherwise rotating round robin. A retired valid slot's
    /// use/dirty bits are written back to the page table first.
    pub fn handle_fault(&self, kernel: &Kernel) -> Result<(), VmError> {
        let machine = kernel.machine.as_ref();
        let vaddr = machine.bad_vaddr();
        let vpn = vaddr / PAGE_SIZE as u32;
        trace!("page fault at {:#x} (page {})", vaddr, vpn);

        let space = kernel
            .threads
            .current_space()
            .ok_or(VmError::BadAddress { vpn })?;
        let entry = space.load_page(machine, &kernel.core_map, vpn)?;

        let tlb = machine.tlb_snapshot();
        let slot = match tlb.iter().position(|e| !e.valid) {
            Some(free) => free,
            None => {
                let mut next = lock(&self.next_slot);
                let slot = *next;
                *next = (slot + 1) % TLB_SIZE;
                slot
            }
        };
        if tlb[slot].valid {
            space.note_tlb_bits(&tlb[slot]);
        }
        machine.set_tlb_entry(slot, entry);
        kernel.core_map.unpin(entry.physical_page);
        #[cfg(feature = "lru")]
        kernel.core_map.note_fill(entry.physical_page);
        Ok(())
    }
}

impl Default for TlbHandler {
    fn default() -> Self {
        Self::new()
    }
}
