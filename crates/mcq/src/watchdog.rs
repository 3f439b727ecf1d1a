//! Watchdog and slice timers.
//!
//! Every core carries two tick-driven one-shot timers, polled from
//! [`Device::tick`](crate::Device::tick) under the core's deferred context:
//!
//! - the watchdog, armed whenever the core starts working or gains a buffer,
//!   for `watchdog_ticks_per_buffer` per pending buffer (or the fixed
//!   arbiter window when configured). Progress re-arms it.
//! - the slice timer, armed while a streaming buffer is at the head and
//!   re-armed each time the client feeds it data.
//!
//! On expiry the core is recovered by exactly one path: a confirmed abort,
//! or failing that a hard reset with a power cycle. If the reset fails too,
//! the subsystem reset is requested and the core's queue is failed.

use log::{error, info, warn};
use mcq_hal::regs::{Ctrl, REG_INT_STATUS};

use crate::cores::{AbortReason, Core, CoreCtx, CoreState};
use crate::device::DeviceShared;
use crate::trace::{MCQ_RECOVERY, MCQ_WDOG_ARM, MCQ_WDOG_DISARM, MCQ_WDOG_EXPIRE};
use crate::types::ResultTag;

/// One-shot tick counter, the per-core equivalent of a time event.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    remaining: u64,
    armed: bool,
}

impl Timer {
    pub fn arm(&mut self, ticks: u64) {
        self.remaining = ticks.max(1);
        self.armed = true;
    }

    /// Returns `true` if the timer was armed.
    pub fn disarm(&mut self) -> bool {
        let was = self.armed;
        self.armed = false;
        self.remaining = 0;
        was
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Advances one tick. Returns `true` exactly once, on expiry.
    pub fn poll(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

impl DeviceShared {
    pub(crate) fn tick(&self) {
        if self.is_shut_down() {
            return;
        }
        for core in &self.cores {
            let mut guard = core.ctx.lock();
            let ctx = &mut *guard;
            if ctx.watchdog.poll() {
                self.on_watchdog_expired(core, ctx);
            }
            if ctx.slice.poll() {
                self.on_slice_expired(core, ctx);
            }
        }
    }

    pub(crate) fn arm_watchdog(&self, core: &Core, ctx: &mut CoreCtx) {
        let ticks = match self.config.hw_arbiter_timeout_ticks {
            Some(window) => window,
            None => {
                let pending = self.pending_count(core).max(1) as u64;
                self.config.watchdog_ticks_per_buffer * pending
            }
        };
        ctx.watchdog.arm(ticks);
        let mut payload = [0u8; 9];
        payload[0] = core.id.0;
        payload[1..].copy_from_slice(&ticks.to_le_bytes());
        self.tracer.emit(MCQ_WDOG_ARM, &payload);
    }

    pub(crate) fn disarm_watchdog(&self, core: &Core, ctx: &mut CoreCtx) {
        if ctx.watchdog.disarm() {
            self.tracer.emit(MCQ_WDOG_DISARM, &[core.id.0]);
        }
    }

    /// Starts the slice timer if `head` is a streaming buffer, stops it otherwise.
    pub(crate) fn arm_slice(&self, ctx: &mut CoreCtx, head: usize) {
        let streaming = self.arena.lock().slot(head).streaming();
        if streaming {
            ctx.slice_target = Some(head);
            ctx.slice.arm(self.config.slice_timeout_ticks);
        } else {
            ctx.slice_target = None;
            ctx.slice.disarm();
        }
    }

    fn on_watchdog_expired(&self, core: &Core, ctx: &mut CoreCtx) {
        self.service(core, ctx);
        if ctx.state != CoreState::Working {
            return;
        }
        if self.arena.lock().head(core.id).is_none() {
            self.go_idle(core, ctx);
            return;
        }
        warn!("{}: watchdog expired", core.id);
        self.tracer.emit(MCQ_WDOG_EXPIRE, &[core.id.0]);
        self.recover(core, ctx, AbortReason::Watchdog, ResultTag::Aborted, None);
    }

    fn on_slice_expired(&self, core: &Core, ctx: &mut CoreCtx) {
        self.service(core, ctx);
        let Some(target) = ctx.slice_target.take() else {
            return;
        };
        if ctx.state != CoreState::Working || self.arena.lock().head(core.id) != Some(target) {
            return;
        }
        warn!("{}: slice expired, requesting skip", core.id);
        ctx.skip_confirmed = false;
        core.control(Ctrl::SKIP);

        let deadline = std::time::Instant::now() + self.config.abort_timeout();
        loop {
            self.service(core, ctx);
            if ctx.skip_confirmed || self.arena.lock().head(core.id) != Some(target) {
                return;
            }
            if !self.wait_status(core, deadline) {
                break;
            }
        }
        warn!("{}: skip not honoured, aborting the slice", core.id);
        self.recover(core, ctx, AbortReason::Slice, ResultTag::SliceAborted, Some(target));
    }

    /// Stops a hung core and fails its current buffer with `tag`.
    ///
    /// `expected` restricts the failure to one buffer; if something else is
    /// at the head by the time the core is stopped, nothing is failed.
    pub(crate) fn recover(
        &self,
        core: &Core,
        ctx: &mut CoreCtx,
        reason: AbortReason,
        tag: ResultTag,
        expected: Option<usize>,
    ) {
        if self.abort_and_wait(core, ctx, reason) {
            ctx.recovery.abort += 1;
            self.tracer.emit(MCQ_RECOVERY, &[core.id.0, 0]);
            info!("{}: recovered by abort", core.id);
        } else if self.reset_core(core, ctx) {
            ctx.recovery.reset += 1;
            self.tracer.emit(MCQ_RECOVERY, &[core.id.0, 1]);
            warn!("{}: recovered by reset", core.id);
        } else {
            self.escalate(core, ctx);
            return;
        }

        let head = self.arena.lock().head(core.id);
        if let Some(head) = head {
            if expected.map_or(true, |want| want == head) {
                self.finish(core, ctx, head, tag);
            }
        }
        self.restart_or_idle(core, ctx);
    }

    /// Hard reset: reset the core, cycle its power reference and restore the
    /// static configuration. Returns `false` if the core did not come back.
    pub(crate) fn reset_core(&self, core: &Core, ctx: &mut CoreCtx) -> bool {
        warn!("{}: abort not confirmed, resetting core", core.id);
        core.control(Ctrl::RESET);
        core.irq.clear();
        core.regs.write(REG_INT_STATUS, u32::MAX);

        if ctx.power_held {
            ctx.power_held = false;
            self.power.release();
        }
        match self.power.acquire() {
            Ok(generation) => {
                ctx.power_held = true;
                ctx.power_gen = generation;
            }
            Err(err) => {
                error!("{}: power re-acquire failed: {err}", core.id);
                return false;
            }
        }
        self.set_state(core, ctx, CoreState::PoweredOn);
        core.program_static();
        if core.hw_busy() {
            error!("{}: still busy after reset", core.id);
            return false;
        }
        self.set_state(core, ctx, CoreState::Idle);
        // Status words survive the reset; chained buffers that ran to their
        // jump without an interrupt are complete.
        self.retire_done(core, ctx);
        true
    }

    /// Last resort: request the subsystem reset and fail every queued buffer.
    pub(crate) fn escalate(&self, core: &Core, ctx: &mut CoreCtx) {
        error!("{}: core unrecoverable, failing its queue", core.id);
        ctx.recovery.escalated += 1;
        self.tracer.emit(MCQ_RECOVERY, &[core.id.0, 2]);
        self.power.request_subsystem_reset();
        self.retire_done(core, ctx);
        self.fail_queue(core, ctx, ResultTag::Aborted);
        self.go_idle(core, ctx);
    }
}
