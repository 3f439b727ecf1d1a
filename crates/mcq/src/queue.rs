//! Per-core work queues.
//!
//! Queues are intrusive doubly linked lists threaded through the pool slots.
//! The list order mirrors the hardware chain: every linked buffer's jump
//! points at its successor, and the tail's jump is not ready.
//!
//! The list operations here only touch metadata. The `link_*` and
//! [`unlink`] helpers pair them with the matching jump patches; callers hold
//! the arena lock across both so the list and the chain never disagree.

use crate::encoder::CommandEncoder;
use crate::error::CqResult;
use crate::memory::PoolMemory;
use crate::pool::{Arena, SlotFlags, SlotState};
use crate::types::CoreId;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct QueueEnds {
    pub(crate) head: Option<u16>,
    pub(crate) tail: Option<u16>,
    pub(crate) len: usize,
}

impl Arena {
    pub(crate) fn head(&self, core: CoreId) -> Option<usize> {
        self.queues[core.index()].head.map(usize::from)
    }

    pub(crate) fn tail(&self, core: CoreId) -> Option<usize> {
        self.queues[core.index()].tail.map(usize::from)
    }

    pub(crate) fn queue_len(&self, core: CoreId) -> usize {
        self.queues[core.index()].len
    }

    pub(crate) fn next_of(&self, index: usize) -> Option<usize> {
        self.slots[index].next.map(usize::from)
    }

    /// Queue contents in execution order.
    pub(crate) fn nodes(&self, core: CoreId) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.queue_len(core));
        let mut cursor = self.head(core);
        while let Some(index) = cursor {
            out.push(index);
            cursor = self.next_of(index);
        }
        out
    }

    fn push_back(&mut self, core: CoreId, index: usize) -> Option<usize> {
        let ends = self.queues[core.index()];
        {
            let slot = &mut self.slots[index];
            slot.prev = ends.tail;
            slot.next = None;
            slot.core = Some(core);
            slot.state = SlotState::Linked;
        }
        if let Some(tail) = ends.tail {
            self.slots[tail as usize].next = Some(index as u16);
        }
        let q = &mut self.queues[core.index()];
        if q.head.is_none() {
            q.head = Some(index as u16);
        }
        q.tail = Some(index as u16);
        q.len += 1;
        ends.tail.map(usize::from)
    }

    fn insert_before(&mut self, core: CoreId, index: usize, before: usize) -> Option<usize> {
        let prev = self.slots[before].prev;
        {
            let slot = &mut self.slots[index];
            slot.prev = prev;
            slot.next = Some(before as u16);
            slot.core = Some(core);
            slot.state = SlotState::Linked;
        }
        self.slots[before].prev = Some(index as u16);
        match prev {
            Some(p) => self.slots[p as usize].next = Some(index as u16),
            None => self.queues[core.index()].head = Some(index as u16),
        }
        self.queues[core.index()].len += 1;
        prev.map(usize::from)
    }

    fn detach(&mut self, index: usize) -> (Option<usize>, Option<usize>) {
        let (prev, next, core) = {
            let slot = &mut self.slots[index];
            (slot.prev.take(), slot.next.take(), slot.core)
        };
        let Some(core) = core else {
            return (None, None);
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.queues[core.index()].head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.queues[core.index()].tail = prev,
        }
        let q = &mut self.queues[core.index()];
        q.len = q.len.saturating_sub(1);
        (prev.map(usize::from), next.map(usize::from))
    }
}

fn point(
    arena: &Arena,
    mem: &PoolMemory,
    encoder: &CommandEncoder,
    from: usize,
    to: Option<usize>,
) -> CqResult<()> {
    let slot = arena.slot(from);
    match &slot.encoded {
        Some(encoded) => {
            encoder.patch_jump(mem, from, encoded, to, slot.flags.contains(SlotFlags::IRQ))
        }
        None => Ok(()),
    }
}

/// Appends `index` to `core`'s queue and chains the old tail to it.
pub(crate) fn link_tail(
    arena: &mut Arena,
    mem: &PoolMemory,
    encoder: &CommandEncoder,
    core: CoreId,
    index: usize,
) -> CqResult<()> {
    point(arena, mem, encoder, index, None)?;
    if let Some(prev) = arena.push_back(core, index) {
        point(arena, mem, encoder, prev, Some(index))?;
    }
    Ok(())
}

/// Inserts `index` in front of `before` and rewires both jumps.
pub(crate) fn link_before(
    arena: &mut Arena,
    mem: &PoolMemory,
    encoder: &CommandEncoder,
    core: CoreId,
    index: usize,
    before: usize,
) -> CqResult<()> {
    point(arena, mem, encoder, index, Some(before))?;
    if let Some(prev) = arena.insert_before(core, index, before) {
        point(arena, mem, encoder, prev, Some(index))?;
    }
    Ok(())
}

/// Removes `index` from its queue and bridges its neighbours.
///
/// The caller guarantees the core is not about to execute `index`: either
/// it already finished, or the core is stopped.
pub(crate) fn unlink(
    arena: &mut Arena,
    mem: &PoolMemory,
    encoder: &CommandEncoder,
    index: usize,
) -> CqResult<()> {
    let (prev, next) = arena.detach(index);
    if let Some(prev) = prev {
        point(arena, mem, encoder, prev, next)?;
    }
    Ok(())
}
