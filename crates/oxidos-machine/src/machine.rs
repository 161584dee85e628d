use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::MachineError;
use crate::mmu::{
    Translation, TranslationEntry, TranslationMode, MEMORY_SIZE, NUM_PHYS_PAGES, PAGE_SIZE,
    TLB_SIZE,
};

pub const NUM_GP_REGS: usize = 32;

/// r29, user stack pointer.
pub const STACK_REG: usize = 29;
/// r31, return address.
pub const RET_ADDR_REG: usize = 31;
pub const HI_REG: usize = 32;
pub const LO_REG: usize = 33;
/// Current program counter.
pub const PC_REG: usize = 34;
/// Next program counter, one branch-delay slot ahead.
pub const NEXT_PC_REG: usize = 35;
/// Previous program counter, kept for debugging.
pub const PREV_PC_REG: usize = 36;
pub const LOAD_REG: usize = 37;
pub const LOAD_VALUE_REG: usize = 38;
/// Faulting virtual address of the last memory exception.
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

/// r2 carries the system-call id on entry and the result on exit.
pub const RETVAL_REG: usize = 2;
/// r4-r7 carry the system-call arguments.
pub const ARG_REGS: [usize; 4] = [4, 5, 6, 7];

/// Exception kinds the machine can raise into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exception {
    NoException,
    Syscall,
    PageFault,
    ReadOnly,
    BusError,
    AddressError,
    Overflow,
    IllegalInstruction,
}

pub const NUM_EXCEPTIONS: usize = 8;

impl Exception {
    fn index(self) -> usize {
        match self {
            Exception::NoException => 0,
            Exception::Syscall => 1,
            Exception::PageFault => 2,
            Exception::ReadOnly => 3,
            Exception::BusError => 4,
            Exception::AddressError => 5,
            Exception::Overflow => 6,
            Exception::IllegalInstruction => 7,
        }
    }
}

impl MachineError {
    /// The exception kind this fault raises.
    pub fn exception(&self) -> Exception {
        match self {
            MachineError::PageFault { .. } => Exception::PageFault,
            MachineError::ReadOnly { .. } => Exception::ReadOnly,
            MachineError::AddressError { .. } => Exception::AddressError,
            MachineError::BusError { .. } => Exception::BusError,
        }
    }
}

/// Kernel-side receiver for a machine exception.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, machine: &Machine, which: Exception);
}

/// Instruction-interpreter seam. A real interpreter decodes and executes
/// user instructions, raising exceptions through the machine; `step`
/// returns false when it has nothing further to run.
pub trait Cpu: Send + Sync {
    fn step(&self, machine: &Machine) -> bool;
}

struct MachineState {
    regs: [u32; NUM_TOTAL_REGS],
    memory: Vec<u8>,
    translation: Translation,
    bad_vaddr: u32,
}

/// The register file, main memory and MMU of the simulated machine.
pub struct Machine {
    state: Mutex<MachineState>,
    handlers: Mutex<[Option<Arc<dyn ExceptionHandler>>; NUM_EXCEPTIONS]>,
    halted: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Machine {
    pub fn new(mode: TranslationMode) -> Self {
        let translation = match mode {
            TranslationMode::PageTable => Translation::PageTable(Vec::new()),
            TranslationMode::Tlb => Translation::Tlb([TranslationEntry::invalid(); TLB_SIZE]),
        };
        Self {
            state: Mutex::new(MachineState {
                regs: [0; NUM_TOTAL_REGS],
                memory: vec![0; MEMORY_SIZE],
                translation,
                bad_vaddr: 0,
            }),
            handlers: Mutex::new(std::array::from_fn(|_| None)),
            halted: AtomicBool::new(false),
        }
    }

    // -- registers --

    pub fn read_reg(&self, reg: usize) -> u32 {
        assert!(reg < NUM_TOTAL_REGS, "register {reg} out of range");
        lock(&self.state).regs[reg]
    }

    pub fn write_reg(&self, reg: usize, value: u32) {
        assert!(reg < NUM_TOTAL_REGS, "register {reg} out of range");
        if reg == 0 {
            return; // r0 is hard-wired zero
        }
        lock(&self.state).regs[reg] = value;
    }

    pub fn user_regs(&self) -> [u32; NUM_TOTAL_REGS] {
        lock(&self.state).regs
    }

    pub fn set_user_regs(&self, regs: &[u32; NUM_TOTAL_REGS]) {
        lock(&self.state).regs = *regs;
    }

    /// Advance past the trap instruction, honoring the branch delay slot.
    pub fn advance_pc(&self) {
        let mut st = lock(&self.state);
        let pc = st.regs[PC_REG];
        st.regs[PREV_PC_REG] = pc;
        let next = st.regs[NEXT_PC_REG];
        st.regs[PC_REG] = next;
        st.regs[NEXT_PC_REG] = next + 4;
    }

    // -- virtual memory access --

    /// Read `size` (1, 2 or 4) bytes at a user virtual address. On failure
    /// the faulting address is latched for the exception handler; callers
    /// that can service a page fault retry once.
    pub fn read_mem(&self, vaddr: u32, size: usize) -> Result<u32, MachineError> {
        let mut st = lock(&self.state);
        let paddr = match translate(&mut st, vaddr, size, false) {
            Ok(p) => p,
            Err(e) => {
                st.bad_vaddr = vaddr;
                st.regs[BAD_VADDR_REG] = vaddr;
                return Err(e);
            }
        };
        let mut value = 0u32;
        for i in 0..size {
            value |= (st.memory[paddr as usize + i] as u32) << (8 * i);
        }
        Ok(value)
    }

    /// Write `size` (1, 2 or 4) bytes at a user virtual address.
    pub fn write_mem(&self, vaddr: u32, size: usize, value: u32) -> Result<(), MachineError> {
        let mut st = lock(&self.state);
        let paddr = match translate(&mut st, vaddr, size, true) {
            Ok(p) => p,
            Err(e) => {
                st.bad_vaddr = vaddr;
                st.regs[BAD_VADDR_REG] = vaddr;
                return Err(e);
            }
        };
        for i in 0..size {
            st.memory[paddr as usize + i] = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    /// Faulting address of the most recent memory exception.
    pub fn bad_vaddr(&self) -> u32 {
        lock(&self.state).bad_vaddr
    }

    // -- physical memory (loader and pager side door) --

    pub fn phys_read(&self, paddr: u32, buf: &mut [u8]) -> Result<(), MachineError> {
        let st = lock(&self.state);
        let start = paddr as usize;
        let end = start + buf.len();
        if end > st.memory.len() {
            return Err(MachineError::BusError { addr: paddr });
        }
        buf.copy_from_slice(&st.memory[start..end]);
        Ok(())
    }

    pub fn phys_write(&self, paddr: u32, buf: &[u8]) -> Result<(), MachineError> {
        let mut st = lock(&self.state);
        let start = paddr as usize;
        let end = start + buf.len();
        if end > st.memory.len() {
            return Err(MachineError::BusError { addr: paddr });
        }
        st.memory[start..end].copy_from_slice(buf);
        Ok(())
    }

    pub fn zero_frame(&self, frame: u32) {
        let mut st = lock(&self.state);
        let start = frame as usize * PAGE_SIZE;
        st.memory[start..start + PAGE_SIZE].fill(0);
    }

    // -- translation structures --

    /// Install a page table. Panics if the machine was built in TLB mode;
    /// picking one translation structure is a boot-time decision.
    pub fn set_page_table(&self, table: Vec<TranslationEntry>) {
        let mut st = lock(&self.state);
        match &mut st.translation {
            Translation::PageTable(t) => *t = table,
            Translation::Tlb(_) => panic!("machine uses a TLB, not a page table"),
        }
    }

    pub fn page_table_snapshot(&self) -> Vec<TranslationEntry> {
        let st = lock(&self.state);
        match &st.translation {
            Translation::PageTable(t) => t.clone(),
            Translation::Tlb(_) => panic!("machine uses a TLB, not a page table"),
        }
    }

    pub fn tlb_snapshot(&self) -> [TranslationEntry; TLB_SIZE] {
        let st = lock(&self.state);
        match &st.translation {
            Translation::Tlb(t) => *t,
            Translation::PageTable(_) => panic!("machine uses a page table, not a TLB"),
        }
    }

    pub fn set_tlb_entry(&self, slot: usize, entry: TranslationEntry) {
        assert!(slot < TLB_SIZE, "tlb slot {slot} out of range");
        let mut st = lock(&self.state);
        match &mut st.translation {
            Translation::Tlb(t) => t[slot] = entry,
            Translation::PageTable(_) => panic!("machine uses a page table, not a TLB"),
        }
    }

    pub fn invalidate_tlb(&self) {
        let mut st = lock(&self.state);
        if let Translation::Tlb(t) = &mut st.translation {
            *t = [TranslationEntry::invalid(); TLB_SIZE];
        }
    }

    // -- exceptions --

    pub fn set_handler(&self, which: Exception, handler: Arc<dyn ExceptionHandler>) {
        lock(&self.handlers)[which.index()] = Some(handler);
    }

    /// Raise an exception into the registered handler. Raising a kind with
    /// no handler installed is a kernel configuration bug.
    pub fn raise(&self, which: Exception) {
        debug!("exception raised: {:?}", which);
        let handler = lock(&self.handlers)[which.index()].clone();
        match handler {
            Some(h) => h.handle(self, which),
            None => panic!("no handler registered for exception {:?}", which),
        }
    }

    // -- execution --

    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Resume user execution until the interpreter runs out of work or the
    /// machine halts.
    pub fn run(&self, cpu: &dyn Cpu) {
        while !self.is_halted() && cpu.step(self) {}
    }
}

fn translate(
    st: &mut MachineState,
    vaddr: u32,
    size: usize,
    writing: bool,
) -> Result<u32, MachineError> {
    debug_assert!(size == 1 || size == 2 || size == 4);
    if (size == 2 && vaddr & 1 != 0) || (size == 4 && vaddr & 3 != 0) {
        return Err(MachineError::AddressError { addr: vaddr });
    }

    let vpn = vaddr / PAGE_SIZE as u32;
    let offset = vaddr % PAGE_SIZE as u32;

    let entry = match &mut st.translation {
        Translation::PageTable(table) => {
            if vpn as usize >= table.len() {
                return Err(MachineError::AddressError { addr: vaddr });
            }
            let entry = &mut table[vpn as usize];
            if !entry.valid {
                return Err(MachineError::PageFault { addr: vaddr });
            }
            entry
        }
        Translation::Tlb(tlb) => {
            match tlb
                .iter_mut()
                .find(|e| e.valid && e.virtual_page == vpn)
            {
                Some(entry) => entry,
                None => return Err(MachineError::PageFault { addr: vaddr }),
            }
        }
    };

    if entry.read_only && writing {
        return Err(MachineError::ReadOnly { addr: vaddr });
    }
    if entry.physical_page as usize >= NUM_PHYS_PAGES {
        return Err(MachineError::BusError { addr: vaddr });
    }

    entry.used = true;
    if writing {
        entry.dirty = true;
    }
    Ok(entry.physical_page * PAGE_SIZE as u32 + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_machine(pages: u32) -> Machine {
        let machine = Machine::new(TranslationMode::PageTable);
        let table = (0..pages)
            .map(|i| TranslationEntry {
                virtual_page: i,
                physical_page: i,
                valid: true,
                used: false,
                dirty: false,
                read_only: false,
            })
            .collect();
        machine.set_page_table(table);
        machine
    }

    #[test]
    fn read_write_round_trip() {
        let m = identity_machine(4);
        m.write_mem(0x10, 4, 0xdead_beef).unwrap();
        assert_eq!(m.read_mem(0x10, 4).unwrap(), 0xdead_beef);
        assert_eq!(m.read_mem(0x10, 1).unwrap(), 0xef);
    }

    #[test]
    fn misaligned_word_is_address_error() {
        let m = identity_machine(1);
        assert_eq!(
            m.read_mem(0x2, 4),
            Err(MachineError::AddressError { addr: 0x2 })
        );
    }

    #[test]
    fn out_of_range_page_is_address_error() {
        let m = identity_machine(1);
        let addr = PAGE_SIZE as u32 * 2;
        assert_eq!(
            m.read_mem(addr, 1),
            Err(MachineError::AddressError { addr })
        );
        assert_eq!(m.bad_vaddr(), addr);
    }

    #[test]
    fn read_only_page_rejects_writes() {
        let m = Machine::new(TranslationMode::PageTable);
        m.set_page_table(vec![TranslationEntry {
            virtual_page: 0,
            physical_page: 0,
            valid: true,
            used: false,
            dirty: false,
            read_only: true,
        }]);
        assert_eq!(m.read_mem(0, 1), Ok(0));
        assert_eq!(
            m.write_mem(0, 1, 1),
            Err(MachineError::ReadOnly { addr: 0 })
        );
    }

    #[test]
    fn tlb_miss_is_page_fault() {
        let m = Machine::new(TranslationMode::Tlb);
        assert_eq!(m.read_mem(0, 1), Err(MachineError::PageFault { addr: 0 }));

        let mut entry = TranslationEntry::invalid();
        entry.virtual_page = 0;
        entry.physical_page = 3;
        entry.valid = true;
        m.set_tlb_entry(0, entry);
        m.write_mem(0x4, 4, 77).unwrap();
        assert_eq!(m.read_mem(0x4, 4).unwrap(), 77);

        // The MMU tracked the access in the TLB slot.
        let tlb = m.tlb_snapshot();
        assert!(tlb[0].used);
        assert!(tlb[0].dirty);
    }

    #[test]
    fn mmu_sets_use_and_dirty_bits() {
        let m = identity_machine(2);
        m.write_mem(PAGE_SIZE as u32, 1, 9).unwrap();
        let table = m.page_table_snapshot();
        assert!(table[1].used);
        assert!(table[1].dirty);
        assert!(!table[0].used);
    }

    #[test]
    fn register_zero_stays_zero() {
        let m = identity_machine(1);
        m.write_reg(0, 42);
        assert_eq!(m.read_reg(0), 0);
        m.write_reg(2, 42);
        assert_eq!(m.read_reg(2), 42);
    }

    #[test]
    fn advance_pc_walks_delay_slot() {
        let m = identity_machine(1);
        m.write_reg(PC_REG, 100);
        m.write_reg(NEXT_PC_REG, 104);
        m.advance_pc();
        assert_eq!(m.read_reg(PREV_PC_REG), 100);
        assert_eq!(m.read_reg(PC_REG), 104);
        assert_eq!(m.read_reg(NEXT_PC_REG), 108);
    }
}
