//! A user address space: the page table, the executable it loads from,
//! and (with swap) the per-process backing file.
//!
//! Page-table encoding with demand loading: an entry whose `virtual_page`
//! equals its own index is resident; `num_pages` means "never loaded";
//! `num_pages + 1` means "in the swap file".

use std::sync::{Arc, Mutex};

use log::debug;
use oxidos_layout::{ExecHeader, ExecSegment, EXEC_HEADER_SIZE};
use oxidos_machine::{
    Machine, TranslationEntry, NUM_TOTAL_REGS, NEXT_PC_REG, PAGE_SIZE, PC_REG, STACK_REG,
};

use crate::error::VmError;
use crate::fs::open_file::OpenFile;
use crate::userprog::process::SpaceId;
use crate::util::{div_round_up, lock};
use crate::vm::USER_STACK_SIZE;

#[cfg(not(feature = "demand-loading"))]
use oxidos_machine::NUM_PHYS_PAGES;

#[cfg(not(feature = "demand-loading"))]
use crate::vm::frames::FrameAllocator;

#[cfg(feature = "demand-loading")]
use crate::vm::core_map::CoreMap;

#[cfg(feature = "swap")]
use crate::fs::FileSystem;

/// Resident/absent state of one virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Loaded(u32),
    NeverLoaded,
    #[cfg(feature = "swap")]
    InSwap,
}

#[cfg_attr(not(feature = "demand-loading"), allow(dead_code))]
struct SpaceInner {
    page_table: Vec<TranslationEntry>,
    /// Taken out while a page is being filled, so the handle is never
    /// used under the space lock across disk requests.
    exe: Option<OpenFile>,
    header: ExecHeader,
    #[cfg(feature = "swap")]
    swap: Option<OpenFile>,
}

pub struct AddressSpace {
    space_id: SpaceId,
    num_pages: u32,
    inner: Mutex<SpaceInner>,
    #[cfg(not(feature = "demand-loading"))]
    frames: Arc<FrameAllocator>,
    #[cfg(feature = "swap")]
    fs: Arc<FileSystem>,
    #[cfg(feature = "swap")]
    swap_path: String,
}

fn space_size(header: &ExecHeader) -> u32 {
    header.code.size + header.init_data.size + header.uninit_data.size + USER_STACK_SIZE as u32
}

fn read_exec_header(exe: &mut OpenFile) -> Result<ExecHeader, VmError> {
    let mut buf = [0u8; EXEC_HEADER_SIZE];
    exe.read_at(&mut buf, 0)?;
    Ok(ExecHeader::parse(&buf)?)
}

impl AddressSpace {
    /// Build an eagerly loaded space: every page gets a zeroed frame up
    /// front and the code and initialized-data segments are copied in.
    #[cfg(not(feature = "demand-loading"))]
    pub fn new_eager(
        machine: &Machine,
        frames: &Arc<FrameAllocator>,
        mut exe: OpenFile,
        space_id: SpaceId,
    ) -> Result<Arc<Self>, VmError> {
        let header = read_exec_header(&mut exe)?;
        let num_pages = div_round_up(space_size(&header), PAGE_SIZE as u32);
        if num_pages as usize > NUM_PHYS_PAGES {
            return Err(VmError::TooBig { pages: num_pages });
        }
        debug!("space {}: {} pages, eager", space_id, num_pages);

        let mut table: Vec<TranslationEntry> = Vec::with_capacity(num_pages as usize);
        for vpn in 0..num_pages {
            let Some(frame) = frames.alloc() else {
                for entry in &table {
                    frames.free(entry.physical_page);
                }
                return Err(VmError::OutOfFrames);
            };
            machine.zero_frame(frame);
            table.push(TranslationEntry {
                virtual_page: vpn,
                physical_page: frame,
                valid: true,
                used: false,
                dirty: false,
                read_only: false,
            });
        }

        let code = header.code;
        let init_data = header.init_data;
        copy_segment(machine, &table, &mut exe, &code)?;
        copy_segment(machine, &table, &mut exe, &init_data)?;

        Ok(Arc::new(Self {
            space_id,
            num_pages,
            inner: Mutex::new(SpaceInner {
                page_table: table,
                exe: Some(exe),
                header,
            }),
            frames: Arc::clone(frames),
        }))
    }

    /// Build a lazily loaded space: every entry starts "never loaded" and
    /// the fault handler fills pages on demand. With swap, the
    /// per-process backing file is created now and removed on drop.
    #[cfg(feature = "demand-loading")]
    pub fn new_lazy(
        mut exe: OpenFile,
        space_id: SpaceId,
        fs: &Arc<crate::fs::FileSystem>,
    ) -> Result<Arc<Self>, VmError> {
        let header = read_exec_header(&mut exe)?;
        let num_pages = div_round_up(space_size(&header), PAGE_SIZE as u32);
        debug!("space {}: {} pages, lazy", space_id, num_pages);

        let table = (0..num_pages)
            .map(|_| TranslationEntry {
                virtual_page: num_pages, // never loaded
                physical_page: 0,
                valid: false,
                used: false,
                dirty: false,
                read_only: false,
            })
            .collect();

        #[cfg(feature = "swap")]
        let (swap, swap_path) = {
            let swap_path = format!("/SWAP.{}", space_id);
            fs.create(&swap_path, num_pages * PAGE_SIZE as u32, false)?;
            let swap = fs.open(&swap_path)?;
            (Some(swap), swap_path)
        };
        #[cfg(not(feature = "swap"))]
        let _ = fs;

        Ok(Arc::new(Self {
            space_id,
            num_pages,
            inner: Mutex::new(SpaceInner {
                page_table: table,
                exe: Some(exe),
                header,
                #[cfg(feature = "swap")]
                swap,
            }),
            #[cfg(feature = "swap")]
            fs: Arc::clone(fs),
            #[cfg(feature = "swap")]
            swap_path,
        }))
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn page_table(&self) -> Vec<TranslationEntry> {
        lock(&self.inner).page_table.clone()
    }

    pub fn page_state(&self, vpn: u32) -> PageState {
        let g = lock(&self.inner);
        let entry = g.page_table[vpn as usize];
        if entry.valid && entry.virtual_page == vpn {
            PageState::Loaded(entry.physical_page)
        } else {
            #[cfg(feature = "swap")]
            if entry.virtual_page == self.num_pages + 1 {
                return PageState::InSwap;
            }
            PageState::NeverLoaded
        }
    }

    /// Initial register file for a thread entering this space: execution
    /// starts at virtual address 0 and the stack sits at the top, pulled
    /// in a little to avoid running off the end.
    pub fn initial_user_regs(&self) -> [u32; NUM_TOTAL_REGS] {
        let mut regs = [0u32; NUM_TOTAL_REGS];
        regs[PC_REG] = 0;
        regs[NEXT_PC_REG] = 4;
        regs[STACK_REG] = self.num_pages * PAGE_SIZE as u32 - 16;
        regs
    }

    /// Ensure `vpn` is resident, pulling it from the executable or the
    /// swap file, and return its translation. The frame is left pinned in
    /// the core map; the fault handler unpins after installing the TLB
    /// entry.
    #[cfg(feature = "demand-loading")]
    pub fn load_page(
        self: &Arc<Self>,
        machine: &Machine,
        core_map: &CoreMap,
        vpn: u32,
    ) -> Result<TranslationEntry, VmError> {
        if vpn >= self.num_pages {
            return Err(VmError::BadAddress { vpn });
        }
        let state = self.page_state(vpn);
        if let PageState::Loaded(_) = state {
            return Ok(lock(&self.inner).page_table[vpn as usize]);
        }

        let frame = core_map.reserve_page(machine, self, vpn)?;
        machine.zero_frame(frame);

        match state {
            PageState::NeverLoaded => {
                let result = self.fill_from_exec(machine, vpn, frame);
                if let Err(e) = result {
                    core_map.unpin(frame);
                    return Err(e);
                }
            }
            #[cfg(feature = "swap")]
            PageState::InSwap => {
                let result = self.fill_from_swap(machine, vpn, frame);
                if let Err(e) = result {
                    core_map.unpin(frame);
                    return Err(e);
                }
            }
            PageState::Loaded(_) => unreachable!(),
        }

        let mut g = lock(&self.inner);
        let entry = &mut g.page_table[vpn as usize];
        *entry = TranslationEntry {
            virtual_page: vpn,
            physical_page: frame,
            valid: true,
            used: false,
            dirty: false,
            read_only: false,
        };
        Ok(*entry)
    }

    /// Copy the parts of the executable's code and initialized-data
    /// segments that intersect `vpn` into its frame.
    #[cfg(feature = "demand-loading")]
    fn fill_from_exec(&self, machine: &Machine, vpn: u32, frame: u32) -> Result<(), VmError> {
        debug!("space {}: loading page {} from executable", self.space_id, vpn);
        let (mut exe, header) = {
            let mut g = lock(&self.inner);
            (g.exe.take().expect("executable handle in use"), g.header)
        };
        let fake_entry = [TranslationEntry {
            virtual_page: vpn,
            physical_page: frame,
            valid: true,
            used: false,
            dirty: false,
            read_only: false,
        }];
        let mut result = copy_segment(machine, &fake_entry, &mut exe, &header.code);
        if result.is_ok() {
            result = copy_segment(machine, &fake_entry, &mut exe, &header.init_data);
        }
        lock(&self.inner).exe = Some(exe);
        result
    }

    #[cfg(feature = "swap")]
    fn fill_from_swap(&self, machine: &Machine, vpn: u32, frame: u32) -> Result<(), VmError> {
        debug!("space {}: loading page {} from swap", self.space_id, vpn);
        let mut swap = {
            lock(&self.inner).swap.take().expect("swap handle in use")
        };
        let mut buf = vec![0u8; PAGE_SIZE];
        let result = swap.read_at(&mut buf, vpn * PAGE_SIZE as u32);
        lock(&self.inner).swap = Some(swap);
        result?;
        machine.phys_write(frame * PAGE_SIZE as u32, &buf)?;
        Ok(())
    }

    /// Evict `vpn` from `frame` into the swap file, zero the frame, and
    /// drop any TLB slot still mapping it.
    #[cfg(feature = "swap")]
    pub(crate) fn swap_out(&self, machine: &Machine, vpn: u32, frame: u32) -> Result<(), VmError> {
        debug!("space {}: evicting page {} from frame {}", self.space_id, vpn, frame);
        let mut buf = vec![0u8; PAGE_SIZE];
        machine.phys_read(frame * PAGE_SIZE as u32, &mut buf)?;

        let mut swap = {
            lock(&self.inner).swap.take().expect("swap handle in use")
        };
        let result = swap.write_at(&buf, vpn * PAGE_SIZE as u32);
        {
            let mut g = lock(&self.inner);
            g.swap = Some(swap);
            if result.is_ok() {
                g.page_table[vpn as usize] = TranslationEntry {
                    virtual_page: self.num_pages + 1, // in swap
                    physical_page: 0,
                    valid: false,
                    used: false,
                    dirty: false,
                    read_only: false,
                };
            }
        }
        result?;

        machine.zero_frame(frame);
        let tlb = machine.tlb_snapshot();
        for (slot, entry) in tlb.iter().enumerate() {
            if entry.valid && entry.physical_page == frame {
                machine.set_tlb_entry(slot, TranslationEntry::invalid());
            }
        }
        Ok(())
    }

    /// Copy a retired TLB slot's use/dirty bits back to the page table.
    #[cfg(feature = "demand-loading")]
    pub(crate) fn note_tlb_bits(&self, entry: &TranslationEntry) {
        let mut g = lock(&self.inner);
        if let Some(pte) = g.page_table.get_mut(entry.virtual_page as usize) {
            if pte.valid && pte.physical_page == entry.physical_page {
                pte.used |= entry.used;
                pte.dirty |= entry.dirty;
            }
        }
    }

    /// Called when the owning thread is switched out.
    pub fn save_state(&self, machine: &Machine) {
        #[cfg(feature = "demand-loading")]
        {
            let tlb = machine.tlb_snapshot();
            for entry in tlb.iter().filter(|e| e.valid) {
                self.note_tlb_bits(entry);
            }
        }
        #[cfg(not(feature = "demand-loading"))]
        {
            let table = machine.page_table_snapshot();
            let mut g = lock(&self.inner);
            if table.len() == g.page_table.len() {
                g.page_table = table;
            }
        }
    }

    /// Called when the owning thread is switched in.
    pub fn restore_state(&self, machine: &Machine) {
        #[cfg(feature = "demand-loading")]
        machine.invalidate_tlb();
        #[cfg(not(feature = "demand-loading"))]
        machine.set_page_table(lock(&self.inner).page_table.clone());
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        #[cfg(not(feature = "demand-loading"))]
        {
            let g = lock(&self.inner);
            for entry in &g.page_table {
                if entry.valid {
                    self.frames.free(entry.physical_page);
                }
            }
        }
        #[cfg(feature = "swap")]
        {
            // Removal is deferred while our own handle is open; dropping
            // the inner swap handle right after performs the delete.
            let _ = self.fs.remove(&self.swap_path);
        }
    }
}

/// Copy the intersection of each listed page with `seg` from the
/// executable into the page's frame.
fn copy_segment(
    machine: &Machine,
    pages: &[TranslationEntry],
    exe: &mut OpenFile,
    seg: &ExecSegment,
) -> Result<(), VmError> {
    if seg.size == 0 {
        return Ok(());
    }
    let seg_start = seg.virtual_addr;
    let seg_end = seg.virtual_addr + seg.size;
    for entry in pages {
        let page_start = entry.virtual_page * PAGE_SIZE as u32;
        let page_end = page_start + PAGE_SIZE as u32;
        let start = seg_start.max(page_start);
        let end = seg_end.min(page_end);
        if start >= end {
            continue;
        }
        let mut buf = vec![0u8; (end - start) as usize];
        exe.read_at(&mut buf, seg.in_file_addr + (start - seg_start))?;
        let paddr = entry.physical_page * PAGE_SIZE as u32 + (start - page_start);
        machine.phys_write(paddr, &buf)?;
    }
    Ok(())
}
