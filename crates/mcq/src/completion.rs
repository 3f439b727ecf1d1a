//! Completion pipeline.
//!
//! The top half ([`Core::top_half`](crate::cores::Core)) runs in interrupt
//! context: it latches the raw status word into the core's FIFO and
//! acknowledges it. Everything else happens here, in the deferred context:
//!
//! 1. retire every finished buffer from the head of the queue, in order;
//! 2. act on the cause: tag the failed buffer on command or bus errors,
//!    retry on hardware timeouts, settle aborts and skips;
//! 3. once the core has stopped, restart it at the new head or let it idle.
//!
//! Aborts requested by the scheduler or the watchdog are waited for here as
//! well, by draining the FIFO in the requester's own context.

use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use mcq_hal::regs::{Ctrl, IntStatus};

use crate::cores::{AbortReason, Core, CoreCtx, CoreState};
use crate::device::DeviceShared;
use crate::pool::{SlotFlags, SlotState};
use crate::queue;
use crate::trace::{MCQ_BUF_DONE, MCQ_CORE_STATE};
use crate::types::{BufferId, Completion, ResultTag};

/// Longest single sleep while waiting for a status word.
const STATUS_POLL: Duration = Duration::from_millis(1);

impl DeviceShared {
    /// Bottom half: process every status word queued for `core`.
    /// Returns `true` if there was anything to do.
    pub(crate) fn service(&self, core: &Core, ctx: &mut CoreCtx) -> bool {
        let mut worked = false;
        while let Some(raw) = core.irq.pop() {
            self.process_status(core, ctx, IntStatus::from_bits_truncate(raw));
            worked = true;
        }
        worked
    }

    fn process_status(&self, core: &Core, ctx: &mut CoreCtx, status: IntStatus) {
        trace!("{}: status {:?} while {}", core.id, status, ctx.state);
        self.retire_done(core, ctx);

        if status.contains(IntStatus::ABORTED) {
            ctx.abort_confirmed = true;
            if ctx.abort.is_none() {
                warn!("{}: unsolicited abort", core.id);
                let head = self.arena.lock().head(core.id);
                if let Some(head) = head {
                    self.finish(core, ctx, head, ResultTag::Aborted);
                }
                self.restart_or_idle(core, ctx);
            }
            return;
        }

        if status.intersects(IntStatus::BUS_ERR | IntStatus::CMD_ERR) {
            let tag = if status.contains(IntStatus::BUS_ERR) {
                ResultTag::BusError
            } else {
                ResultTag::CommandError
            };
            if let Err(err) = self.mem.write_snapshot(core.id.index(), &core.snapshot()) {
                error!("{}: cannot store register snapshot: {err}", core.id);
            }
            if let Some(index) = self.current_node(core) {
                warn!("{}: {} on slot {}", core.id, tag, index);
                self.finish(core, ctx, index, tag);
            }
            self.restart_or_idle(core, ctx);
            return;
        }

        if status.contains(IntStatus::TIMEOUT) {
            if let Some(index) = self.current_node(core) {
                let restarts = {
                    let mut arena = self.arena.lock();
                    let slot = arena.slot_mut(index);
                    slot.timeout_restarts += 1;
                    slot.timeout_restarts
                };
                if restarts > self.config.max_timeout_restarts {
                    warn!("{}: slot {} timed out {} times, giving up", core.id, index, restarts);
                    self.finish(core, ctx, index, ResultTag::Aborted);
                } else {
                    debug!("{}: hardware timeout on slot {}, retry {}", core.id, index, restarts);
                }
            }
            self.restart_or_idle(core, ctx);
            return;
        }

        if status.contains(IntStatus::SKIPPED) {
            ctx.skip_confirmed = true;
            if let Some(index) = self.current_node(core) {
                self.finish(core, ctx, index, ResultTag::SliceSuspended);
            }
            self.restart_or_idle(core, ctx);
            return;
        }

        if status.contains(IntStatus::END) {
            self.restart_or_idle(core, ctx);
            return;
        }

        if status.contains(IntStatus::DONE) && ctx.state == CoreState::Working {
            // Still running the chain; progress resets the hang detection.
            self.arm_watchdog(core, ctx);
            let head = self.arena.lock().head(core.id);
            if let Some(head) = head {
                if ctx.slice_target != Some(head) {
                    self.arm_slice(ctx, head);
                }
            }
        }
    }

    /// Retires finished buffers from the head of `core`'s queue, in order.
    pub(crate) fn retire_done(&self, core: &Core, ctx: &mut CoreCtx) -> usize {
        let mut retired = 0;
        loop {
            let head = self.arena.lock().head(core.id);
            let Some(head) = head else {
                break;
            };
            if !self.encoder.is_done(&self.mem, head) || !self.finish(core, ctx, head, ResultTag::Ok) {
                break;
            }
            retired += 1;
        }
        retired
    }

    /// Takes a linked buffer off `core`'s queue with result `tag` and hands
    /// it to its session. Returns `false` if the slot was not queued there.
    ///
    /// The core must not be about to execute `index`.
    pub(crate) fn finish(&self, core: &Core, ctx: &mut CoreCtx, index: usize, tag: ResultTag) -> bool {
        let (owner, completion, freed) = {
            let mut arena = self.arena.lock();
            let slot = arena.slot(index);
            if slot.state != SlotState::Linked || slot.core != Some(core.id) {
                return false;
            }
            if let Err(err) = queue::unlink(&mut arena, &self.mem, &self.encoder, index) {
                error!("{}: unlinking slot {} failed: {err}", core.id, index);
            }
            let slot = arena.slot_mut(index);
            slot.result = Some(tag);
            let completion = Completion {
                id: BufferId::new(index as u16, slot.generation),
                tag,
                core: slot.core,
            };
            let owner = slot.owner.upgrade();
            let freed = owner.is_none() || slot.flags.contains(SlotFlags::NEEDS_REMOVAL);
            if freed {
                arena.free(index);
            } else {
                slot.state = SlotState::Completed;
            }
            (owner, completion, freed)
        };

        if ctx.slice_target == Some(index) {
            ctx.slice_target = None;
            ctx.slice.disarm();
        }
        self.tracer.emit(
            MCQ_BUF_DONE,
            &[core.id.0, index as u8, (index >> 8) as u8, tag.code()],
        );
        debug!("{}: {} finished: {}", core.id, completion.id, tag);

        if freed {
            self.notify_pool();
            if let Some(session) = owner {
                session.wake();
            }
        } else if let Some(session) = owner {
            session.deliver(completion);
        }
        true
    }

    /// Fails every buffer queued on `core` with `tag`. The core must be stopped.
    pub(crate) fn fail_queue(&self, core: &Core, ctx: &mut CoreCtx, tag: ResultTag) {
        loop {
            let head = self.arena.lock().head(core.id);
            match head {
                Some(head) if self.finish(core, ctx, head, tag) => {}
                _ => break,
            }
        }
    }

    /// After the core stopped: start it at the current head, or idle it.
    pub(crate) fn restart_or_idle(&self, core: &Core, ctx: &mut CoreCtx) {
        if ctx.abort.is_some() {
            // The abort requester decides what runs next.
            return;
        }
        if self.is_shut_down() {
            self.fail_queue(core, ctx, ResultTag::Aborted);
            self.go_idle(core, ctx);
            return;
        }
        let queued = self.arena.lock().head(core.id).is_some();
        if queued {
            self.kick(core, ctx);
        } else {
            self.go_idle(core, ctx);
        }
    }

    /// Starts the hardware at the head of the queue.
    pub(crate) fn kick(&self, core: &Core, ctx: &mut CoreCtx) {
        if let Err(err) = self.power_up(core, ctx) {
            error!("{}: cannot power up: {err}", core.id);
            self.escalate(core, ctx);
            return;
        }
        let start = {
            let arena = self.arena.lock();
            arena.head(core.id).and_then(|head| {
                arena
                    .slot(head)
                    .encoded
                    .map(|encoded| (head, encoded, arena.queue_len(core.id)))
            })
        };
        let Some((head, encoded, queued)) = start else {
            self.go_idle(core, ctx);
            return;
        };
        if let Err(err) = self.encoder.rearm(&self.mem, head) {
            error!("{}: cannot clear status of slot {}: {err}", core.id, head);
        }
        core.start(self.layout.cmd_addr(head), encoded.len_words(), queued - 1);
        self.set_state(core, ctx, CoreState::Working);
        self.arm_watchdog(core, ctx);
        self.arm_slice(ctx, head);
        debug!("{}: started at slot {} with {} queued", core.id, head, queued);
    }

    /// Takes a power reference and restores the static configuration if the
    /// domain went down since this core last ran.
    fn power_up(&self, core: &Core, ctx: &mut CoreCtx) -> crate::error::CqResult<()> {
        if ctx.power_held {
            return Ok(());
        }
        let generation = self.power.acquire()?;
        ctx.power_held = true;
        if generation != ctx.power_gen || ctx.state == CoreState::PoweredOff {
            self.set_state(core, ctx, CoreState::PoweredOn);
            core.program_static();
            ctx.power_gen = generation;
            self.set_state(core, ctx, CoreState::Idle);
        }
        Ok(())
    }

    pub(crate) fn go_idle(&self, core: &Core, ctx: &mut CoreCtx) {
        self.disarm_watchdog(core, ctx);
        ctx.slice.disarm();
        ctx.slice_target = None;
        ctx.coalescer.reset();
        if ctx.power_held {
            ctx.power_held = false;
            self.power.release();
        }
        self.set_state(core, ctx, CoreState::Idle);
    }

    pub(crate) fn set_state(&self, core: &Core, ctx: &mut CoreCtx, state: CoreState) {
        if ctx.state == state {
            return;
        }
        debug!("{}: {} -> {}", core.id, ctx.state, state);
        self.tracer
            .emit(MCQ_CORE_STATE, &[core.id.0, ctx.state.code(), state.code()]);
        ctx.state = state;
    }

    /// Requests an abort and waits, draining the FIFO in this context, until
    /// the core confirms or stops on its own. Returns `false` on timeout; the
    /// core is then left in `Aborting` for the caller to reset.
    pub(crate) fn abort_and_wait(&self, core: &Core, ctx: &mut CoreCtx, reason: AbortReason) -> bool {
        self.service(core, ctx);
        ctx.abort = Some(reason);
        ctx.abort_confirmed = false;
        self.set_state(core, ctx, CoreState::Aborting);
        if core.hw_busy() {
            debug!("{}: abort requested ({:?})", core.id, reason);
            core.control(Ctrl::ABORT);
        }

        let deadline = Instant::now() + self.config.abort_timeout();
        let confirmed = loop {
            self.service(core, ctx);
            if ctx.abort_confirmed || core.quiescent() {
                break true;
            }
            if !self.wait_status(core, deadline) {
                break false;
            }
        };
        ctx.abort = None;
        if confirmed {
            self.set_state(core, ctx, CoreState::Idle);
        } else {
            warn!("{}: abort not confirmed within {:?}", core.id, self.config.abort_timeout());
        }
        confirmed
    }

    /// Sleeps briefly for the next status word. Returns `false` once
    /// `deadline` has passed.
    pub(crate) fn wait_status(&self, core: &Core, deadline: Instant) -> bool {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        core.irq.wait_until((now + STATUS_POLL).min(deadline));
        true
    }

    /// The queued buffer the core is executing, or the head if the core is
    /// somewhere else.
    pub(crate) fn current_node(&self, core: &Core) -> Option<usize> {
        let cur = core.cur_addr();
        let arena = self.arena.lock();
        self.layout
            .slot_at(cur)
            .filter(|&index| {
                let slot = arena.slot(index);
                slot.state == SlotState::Linked && slot.core == Some(core.id)
            })
            .or_else(|| arena.head(core.id))
    }

    /// The queued buffer the core is executing right now, if it is running.
    pub(crate) fn executing_node(&self, core: &Core) -> Option<usize> {
        if !core.hw_busy() {
            return None;
        }
        self.current_node(core)
    }

    /// Linked buffers on `core` that have not finished.
    pub(crate) fn pending_count(&self, core: &Core) -> usize {
        let arena = self.arena.lock();
        arena
            .nodes(core.id)
            .into_iter()
            .filter(|&index| !self.encoder.is_done(&self.mem, index))
            .count()
    }
}
