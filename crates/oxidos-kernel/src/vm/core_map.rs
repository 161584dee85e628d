//! Core map: one slot per physical frame, tracking which address space
//! and virtual page currently own it.
//!
//! `reserve_page` hands out free frames first; with swap enabled it then
//! evicts a victim chosen by FIFO cursor (or LRU idle counters with the
//! `lru` feature). A slot stays pinned from reservation until the fault
//! handler has installed the translation, so a frame that is still being
//! filled is never picked as a victim.

use std::sync::{Arc, Mutex, Weak};

use oxidos_machine::{Machine, NUM_PHYS_PAGES};

use crate::error::VmError;
use crate::fs::bitmap::Bitmap;
use crate::util::lock;
use crate::vm::addr_space::AddressSpace;

#[cfg_attr(not(feature = "swap"), allow(dead_code))]
struct Slot {
    owner: Weak<AddressSpace>,
    vpn: u32,
    pinned: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            owner: Weak::new(),
            vpn: 0,
            pinned: false,
        }
    }
}

struct CoreMapInner {
    frames: Bitmap,
    slots: Vec<Slot>,
    #[cfg(not(feature = "lru"))]
    next_victim: usize,
    #[cfg(feature = "lru")]
    idle: Vec<u64>,
}

pub struct CoreMap {
    inner: Mutex<CoreMapInner>,
}

impl CoreMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CoreMapInner {
                frames: Bitmap::new(NUM_PHYS_PAGES),
                slots: (0..NUM_PHYS_PAGES).map(|_| Slot::empty()).collect(),
                #[cfg(not(feature = "lru"))]
                next_victim: 0,
                #[cfg(feature = "lru")]
                idle: vec![0; NUM_PHYS_PAGES],
            }),
        }
    }

    /// Reserve a frame for (`owner`, `vpn`), evicting a victim if memory
    /// is full and swap is available. The returned frame is pinned.
    #[allow(unused_variables)]
    pub fn reserve_page(
        &self,
        machine: &Machine,
        owner: &Arc<AddressSpace>,
        vpn: u32,
    ) -> Result<u32, VmError> {
        let claimed = {
            let mut g = lock(&self.inner);
            match g.frames.find() {
                Some(frame) => {
                    g.slots[frame as usize] = Slot {
                        owner: Arc::downgrade(owner),
                        vpn,
                        pinned: true,
                    };
                    Some(frame)
                }
                None => None,
            }
        };
        if let Some(frame) = claimed {
            return Ok(frame);
        }

        #[cfg(not(feature = "swap"))]
        {
            Err(VmError::OutOfFrames)
        }

        #[cfg(feature = "swap")]
        {
            let (victim, victim_owner, victim_vpn) = {
                let mut g = lock(&self.inner);
                let victim = pick_victim(&mut g).ok_or(VmError::OutOfFrames)?;
                g.slots[victim].pinned = true;
                (
                    victim,
                    g.slots[victim].owner.clone(),
                    g.slots[victim].vpn,
                )
            };

            if let Some(space) = victim_owner.upgrade() {
                if let Err(e) = space.swap_out(machine, victim_vpn, victim as u32) {
                    lock(&self.inner).slots[victim].pinned = false;
                    return Err(e);
                }
            }

            let mut g = lock(&self.inner);
            g.slots[victim] = Slot {
                owner: Arc::downgrade(owner),
                vpn,
                pinned: true,
            };
            Ok(victim as u32)
        }
    }

    /// Release the fill-time pin taken by `reserve_page`.
    pub fn unpin(&self, frame: u32) {
        lock(&self.inner).slots[frame as usize].pinned = false;
    }

    /// Free every frame owned by a dying address space.
    pub fn release_pages(&self, space: &Arc<AddressSpace>) {
        let target = Arc::downgrade(space);
        let mut g = lock(&self.inner);
        for frame in 0..NUM_PHYS_PAGES {
            if g.slots[frame].owner.ptr_eq(&target) {
                g.frames.clear(frame as u32);
                g.slots[frame] = Slot::empty();
            }
        }
    }

    /// Bump every frame's idle counter and zero the one just filled.
    #[cfg(feature = "lru")]
    pub fn note_fill(&self, frame: u32) {
        let mut g = lock(&self.inner);
        for (i, counter) in g.idle.iter_mut().enumerate() {
            if i == frame as usize {
                *counter = 0;
            } else {
                *counter += 1;
            }
        }
    }

    pub fn free_frames(&self) -> usize {
        lock(&self.inner).frames.count_clear()
    }
}

impl Default for CoreMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(feature = "swap", not(feature = "lru")))]
fn pick_victim(g: &mut CoreMapInner) -> Option<usize> {
    for _ in 0..NUM_PHYS_PAGES {
        let victim = g.next_victim;
        g.next_victim = (victim + 1) % NUM_PHYS_PAGES;
        if !g.slots[victim].pinned {
            return Some(victim);
        }
    }
    None
}

#[cfg(feature = "lru")]
fn pick_victim(g: &mut CoreMapInner) -> Option<usize> {
    g.slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| !slot.pinned)
        .max_by_key(|(frame, _)| g.idle[*frame])
        .map(|(frame, _)| frame)
}
