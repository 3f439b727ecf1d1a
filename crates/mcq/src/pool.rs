//! Buffer pool.
//!
//! A fixed arena of slots, each owning one instruction buffer and one status
//! buffer in the shared region. Slot metadata, the free list and the per-core
//! queue links all live in one [`Arena`] guarded by an interrupt-safe lock.
//!
//! Slot lifecycle:
//!
//! ```text
//! Free -> Reserved -> Linked -> Completed -> Free
//!            |           \-(released while linked: freed on unlink)
//!            \-(released before submit)-> Free
//! ```

use std::sync::Weak;

use bitflags::bitflags;

use crate::encoder::Encoded;
use crate::error::{CqError, CqResult};
use crate::queue::QueueEnds;
use crate::session::SessionShared;
use crate::types::{BufferId, CoreId, ModuleClass, OwnerTag, Priority, ResultTag, SessionId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct SlotFlags: u8 {
        /// Buffer consumes streamed data and runs under the slice timer.
        const STREAMING = 1 << 0;
        /// Owner released the buffer while linked; free it once unlinked.
        const NEEDS_REMOVAL = 1 << 1;
        /// The chain jump requests a completion interrupt.
        const IRQ = 1 << 2;
        /// Payload ends in `END`; the buffer cannot chain.
        const TERMINATED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Free,
    Reserved,
    Linked,
    Completed,
}

pub(crate) struct Slot {
    pub(crate) generation: u16,
    pub(crate) state: SlotState,
    pub(crate) session: Option<SessionId>,
    pub(crate) owner: Weak<SessionShared>,
    pub(crate) tag: Option<OwnerTag>,
    pub(crate) class: ModuleClass,
    pub(crate) priority: Priority,
    pub(crate) workload: u32,
    pub(crate) flags: SlotFlags,
    /// Instructions the owner may write.
    pub(crate) reserved_len: usize,
    pub(crate) payload_len: usize,
    pub(crate) encoded: Option<Encoded>,
    pub(crate) core: Option<CoreId>,
    pub(crate) prev: Option<u16>,
    pub(crate) next: Option<u16>,
    pub(crate) result: Option<ResultTag>,
    pub(crate) timeout_restarts: u32,
}

impl Slot {
    fn vacant(generation: u16) -> Self {
        Self {
            generation,
            state: SlotState::Free,
            session: None,
            owner: Weak::new(),
            tag: None,
            class: ModuleClass::DECODER,
            priority: Priority::Normal,
            workload: 0,
            flags: SlotFlags::empty(),
            reserved_len: 0,
            payload_len: 0,
            encoded: None,
            core: None,
            prev: None,
            next: None,
            result: None,
            timeout_restarts: 0,
        }
    }

    pub(crate) fn streaming(&self) -> bool {
        self.flags.contains(SlotFlags::STREAMING)
    }
}

/// Pool occupancy counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub in_use: usize,
    /// Lowest `free` ever observed.
    pub min_free: usize,
}

/// What a client asks for when reserving a slot.
pub(crate) struct Reservation {
    pub(crate) session: SessionId,
    pub(crate) owner: Weak<SessionShared>,
    pub(crate) tag: Option<OwnerTag>,
    pub(crate) class: ModuleClass,
    pub(crate) priority: Priority,
    pub(crate) workload: u32,
    pub(crate) streaming: bool,
    pub(crate) len: usize,
}

/// Outcome of releasing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// Slot is back on the free list.
    Freed,
    /// Slot is still linked; it is freed when the queue lets go of it.
    Deferred,
}

pub(crate) struct Arena {
    pub(crate) slots: Vec<Slot>,
    free: Vec<u16>,
    pub(crate) queues: Vec<QueueEnds>,
    stats: PoolStats,
}

impl Arena {
    pub(crate) fn new(slots: usize, cores: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| Slot::vacant(0)).collect(),
            // Lowest index is handed out first.
            free: (0..slots as u16).rev().collect(),
            queues: vec![QueueEnds::default(); cores],
            stats: PoolStats {
                total: slots,
                free: slots,
                in_use: 0,
                min_free: slots,
            },
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.stats
    }

    pub(crate) fn alloc(&mut self, req: Reservation) -> Option<BufferId> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        let generation = slot.generation.wrapping_add(1);
        *slot = Slot::vacant(generation);
        slot.state = SlotState::Reserved;
        slot.session = Some(req.session);
        slot.owner = req.owner;
        slot.tag = req.tag;
        slot.class = req.class;
        slot.priority = req.priority;
        slot.workload = req.workload;
        slot.reserved_len = req.len;
        if req.streaming {
            slot.flags |= SlotFlags::STREAMING;
        }

        self.stats.free -= 1;
        self.stats.in_use += 1;
        self.stats.min_free = self.stats.min_free.min(self.stats.free);
        Some(BufferId::new(index, generation))
    }

    /// Returns a slot to the free list. The slot must not be linked.
    pub(crate) fn free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert!(slot.prev.is_none() && slot.next.is_none());
        if slot.state == SlotState::Free {
            return;
        }
        *slot = Slot::vacant(slot.generation);
        self.free.push(index as u16);
        self.stats.free += 1;
        self.stats.in_use -= 1;
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// Resolves a live handle to its slot index.
    pub(crate) fn resolve(&self, id: BufferId) -> CqResult<usize> {
        match self.slots.get(id.slot()) {
            Some(slot) if slot.generation == id.generation() && slot.state != SlotState::Free => {
                Ok(id.slot())
            }
            _ => Err(CqError::InvalidBuffer(id)),
        }
    }

    /// Resolves a live handle owned by `session`.
    pub(crate) fn owned(&self, id: BufferId, session: SessionId) -> CqResult<usize> {
        let index = self.resolve(id)?;
        if self.slots[index].session != Some(session) {
            return Err(CqError::NotOwner(id));
        }
        Ok(index)
    }

    /// Releases a handle on behalf of `session`. Returns what happened and
    /// the workload the session gets back.
    pub(crate) fn release(&mut self, id: BufferId, session: SessionId) -> CqResult<(Released, u32)> {
        let index = id.slot();
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(CqError::InvalidBuffer(id));
        };
        if slot.generation != id.generation() || slot.state == SlotState::Free {
            return Err(CqError::AlreadyReleased(id));
        }
        if slot.session != Some(session) {
            return Err(CqError::NotOwner(id));
        }
        let workload = slot.workload;
        match slot.state {
            SlotState::Linked => {
                if slot.flags.contains(SlotFlags::NEEDS_REMOVAL) {
                    return Err(CqError::AlreadyReleased(id));
                }
                slot.flags |= SlotFlags::NEEDS_REMOVAL;
                Ok((Released::Deferred, workload))
            }
            _ => {
                self.free(index);
                Ok((Released::Freed, workload))
            }
        }
    }

    /// Indices of every non-free slot owned by `session`.
    pub(crate) fn owned_by(&self, session: SessionId) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state != SlotState::Free && slot.session == Some(session))
            .map(|(index, _)| index)
            .collect()
    }
}
