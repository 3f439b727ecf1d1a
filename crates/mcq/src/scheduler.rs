//! Core selection, preemption and cancellation.
//!
//! Placement of a submitted buffer, among the cores of its module class
//! that its affinity mask allows:
//!
//! 1. the first core whose queue is empty or whose tail already finished;
//! 2. otherwise the core with the least unfinished workload (first wins on
//!    ties), appending at the tail;
//! 3. a high-priority buffer instead goes in front of the first unfinished
//!    normal buffer on that core. If that buffer is executing, or is next in
//!    line, the core is aborted first and restarted afterwards; the displaced
//!    buffer simply runs again later.

use log::{debug, info};

use crate::cores::{AbortReason, Core, CoreCtx, CoreState};
use crate::device::DeviceShared;
use crate::error::{CqError, CqResult};
use crate::pool::{Arena, Slot, SlotFlags, SlotState};
use crate::queue;
use crate::session::SessionShared;
use crate::trace::{MCQ_BUF_LINK, MCQ_PREEMPT};
use crate::types::{BufferId, CoreId, CoreMask, Priority, ResultTag};

impl DeviceShared {
    pub(crate) fn submit(
        &self,
        session: &SessionShared,
        id: BufferId,
        affinity: CoreMask,
    ) -> CqResult<CoreId> {
        self.check_running()?;
        let (index, class, priority, payload_len, terminated) = {
            let arena = self.arena.lock();
            let index = arena.owned(id, session.id)?;
            let slot = arena.slot(index);
            if slot.state != SlotState::Reserved {
                return Err(CqError::NotReserved(id));
            }
            (
                index,
                slot.class,
                slot.priority,
                slot.payload_len,
                slot.flags.contains(SlotFlags::TERMINATED),
            )
        };

        let candidates: Vec<usize> = self
            .cores
            .iter()
            .enumerate()
            .filter(|(_, core)| core.class == class && affinity.contains(core.id))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return Err(CqError::BadAffinity(affinity.0));
        }

        let encoded = self.encoder.finalize(&self.mem, index, payload_len, terminated)?;
        {
            let mut arena = self.arena.lock();
            arena.owned(id, session.id)?;
            let slot = arena.slot_mut(index);
            if slot.state != SlotState::Reserved {
                return Err(CqError::NotReserved(id));
            }
            slot.encoded = Some(encoded);
        }

        let (chosen, free) = self.select_core(&candidates);
        let core = &self.cores[chosen];
        let mut guard = core.ctx.lock();
        let ctx = &mut *guard;
        if priority == Priority::High && !free {
            self.insert_high(core, ctx, index)?;
        } else {
            self.link_normal(core, ctx, index)?;
        }
        Ok(core.id)
    }

    /// Returns the chosen core index and whether it was picked as free.
    fn select_core(&self, candidates: &[usize]) -> (usize, bool) {
        let arena = self.arena.lock();
        for &i in candidates {
            match arena.tail(self.cores[i].id) {
                None => return (i, true),
                Some(tail) if self.encoder.is_done(&self.mem, tail) => return (i, true),
                Some(_) => {}
            }
        }

        let mut best = candidates[0];
        let mut best_load = u64::MAX;
        for &i in candidates {
            let load = self.remaining_workload(&arena, self.cores[i].id);
            if load < best_load {
                best = i;
                best_load = load;
            }
        }
        (best, false)
    }

    fn remaining_workload(&self, arena: &Arena, core: CoreId) -> u64 {
        arena
            .nodes(core)
            .into_iter()
            .filter(|&index| !self.encoder.is_done(&self.mem, index))
            .map(|index| arena.slot(index).workload as u64)
            .sum()
    }

    /// Appends at the tail and starts the core if it is not running.
    fn link_normal(&self, core: &Core, ctx: &mut CoreCtx, index: usize) -> CqResult<()> {
        self.service(core, ctx);
        let (workload, priority) = {
            let arena = self.arena.lock();
            let slot = arena.slot(index);
            (slot.workload, slot.priority)
        };
        let irq = ctx.coalescer.on_link(workload, priority);
        let queued = {
            let mut arena = self.arena.lock();
            arena.slot_mut(index).flags.set(SlotFlags::IRQ, irq);
            queue::link_tail(&mut arena, &self.mem, &self.encoder, core.id, index)?;
            arena.queue_len(core.id)
        };
        self.note_link(core, index, priority, irq);

        if ctx.state == CoreState::Working {
            core.set_ready_count(queued - 1);
            self.arm_watchdog(core, ctx);
        } else {
            self.kick(core, ctx);
        }
        Ok(())
    }

    fn insert_high(&self, core: &Core, ctx: &mut CoreCtx, index: usize) -> CqResult<()> {
        self.service(core, ctx);
        let before = self.first_pending_normal(&self.arena.lock(), core.id);
        let Some(before) = before else {
            return self.link_normal(core, ctx, index);
        };

        let displaced = self.executing_node(core).filter(|&exec| {
            exec == before || self.arena.lock().next_of(exec) == Some(before)
        });
        let mut stopped = false;
        if let Some(exec) = displaced {
            info!("{}: preempting slot {} for high-priority slot {}", core.id, exec, index);
            self.tracer
                .emit(MCQ_PREEMPT, &[core.id.0, exec as u8, (exec >> 8) as u8]);
            if !self.abort_and_wait(core, ctx, AbortReason::Preempt) {
                if !self.reset_core(core, ctx) {
                    self.escalate(core, ctx);
                    return self.link_normal(core, ctx, index);
                }
                ctx.recovery.reset += 1;
            }
            stopped = true;
        }

        let workload = self.arena.lock().slot(index).workload;
        ctx.coalescer.on_link(workload, Priority::High);
        let queued = {
            let mut arena = self.arena.lock();
            arena.slot_mut(index).flags.insert(SlotFlags::IRQ);
            let target = arena.slot(before);
            let before = if target.state == SlotState::Linked && target.core == Some(core.id) {
                Some(before)
            } else {
                // Finished while the core was being stopped; the core is
                // idle now, so any pending normal buffer can be jumped.
                self.first_pending_normal(&arena, core.id)
            };
            match before {
                Some(before) => {
                    queue::link_before(&mut arena, &self.mem, &self.encoder, core.id, index, before)?
                }
                None => queue::link_tail(&mut arena, &self.mem, &self.encoder, core.id, index)?,
            }
            arena.queue_len(core.id)
        };
        self.note_link(core, index, Priority::High, true);

        if stopped || ctx.state != CoreState::Working {
            self.restart_or_idle(core, ctx);
        } else {
            core.set_ready_count(queued - 1);
            self.arm_watchdog(core, ctx);
        }
        Ok(())
    }

    /// First queued normal-priority buffer on `core` that has not run yet.
    fn first_pending_normal(&self, arena: &Arena, core: CoreId) -> Option<usize> {
        arena.nodes(core).into_iter().find(|&index| {
            arena.slot(index).priority == Priority::Normal && !self.encoder.is_done(&self.mem, index)
        })
    }

    fn note_link(&self, core: &Core, index: usize, priority: Priority, irq: bool) {
        debug!(
            "{}: linked slot {} ({:?}{})",
            core.id,
            index,
            priority,
            if irq { ", irq" } else { "" }
        );
        self.tracer.emit(
            MCQ_BUF_LINK,
            &[core.id.0, index as u8, (index >> 8) as u8, priority as u8],
        );
    }

    /// Cancels every queued buffer matching `pred`. Buffers the hardware is
    /// running, or about to run, are stopped first. Returns the number of
    /// buffers cancelled.
    pub(crate) fn cancel_where(&self, pred: impl Fn(&Slot) -> bool) -> usize {
        let mut cancelled = 0;
        for core in &self.cores {
            let mut guard = core.ctx.lock();
            let ctx = &mut *guard;
            self.service(core, ctx);

            let victims: Vec<usize> = {
                let arena = self.arena.lock();
                arena
                    .nodes(core.id)
                    .into_iter()
                    .filter(|&i| pred(arena.slot(i)))
                    .collect()
            };
            if victims.is_empty() {
                continue;
            }

            let mut stopped = false;
            if let Some(exec) = self.executing_node(core) {
                let next = self.arena.lock().next_of(exec);
                let touches = victims.contains(&exec) || next.map_or(false, |n| victims.contains(&n));
                if touches {
                    if !self.abort_and_wait(core, ctx, AbortReason::Cancel) {
                        if !self.reset_core(core, ctx) {
                            self.retire_done(core, ctx);
                            cancelled += victims
                                .iter()
                                .filter(|&&index| self.finish(core, ctx, index, ResultTag::Aborted))
                                .count();
                            self.escalate(core, ctx);
                            continue;
                        }
                        ctx.recovery.reset += 1;
                    }
                    stopped = true;
                }
            }

            for index in victims {
                if self.finish(core, ctx, index, ResultTag::Aborted) {
                    cancelled += 1;
                }
            }
            debug!("{}: cancelled buffers, {} cancelled so far", core.id, cancelled);
            if stopped {
                self.restart_or_idle(core, ctx);
            } else if ctx.state == CoreState::Working {
                self.arm_watchdog(core, ctx);
            }
        }
        cancelled
    }
}
