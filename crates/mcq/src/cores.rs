//! Per-core state.
//!
//! Each core owns a register window, a status FIFO filled by the interrupt
//! top half, and a deferred context: the sleeping lock under which its
//! bottom half, watchdog, aborts and restarts run. The context is never
//! entered twice at once, which serializes every decision about one core's
//! queue and hardware.

use std::fmt;
use std::time::Instant;

use heapless::Deque;
use mcq_hal::regs::{
    Ctrl, HwState, REG_CMD_ADDR, REG_CMD_LEN, REG_CONFIG, REG_COUNT, REG_CTRL, REG_CUR_ADDR,
    REG_INT_STATUS, REG_READY_COUNT,
};
use mcq_hal::RegisterBlock;

use crate::encoder::IrqCoalescer;
use crate::sync::{Arc, Condvar, IrqLock, Mutex};
use crate::types::{CoreId, ModuleClass};
use crate::watchdog::Timer;

/// Raw status words buffered between top and bottom half.
const STATUS_FIFO_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreState {
    PoweredOff,
    /// Powered, static configuration being programmed.
    PoweredOn,
    Idle,
    Working,
    Aborting,
}

impl CoreState {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::PoweredOff => 0,
            Self::PoweredOn => 1,
            Self::Idle => 2,
            Self::Working => 3,
            Self::Aborting => 4,
        }
    }
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoweredOff => "powered-off",
            Self::PoweredOn => "powered-on",
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// Why an abort was requested. Decides what happens to the head buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortReason {
    /// Make room for a high-priority buffer; the head runs again later.
    Preempt,
    Watchdog,
    Cancel,
    Slice,
    Shutdown,
}

/// How often each recovery path ran on one core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounts {
    /// Recovered by a confirmed abort.
    pub abort: u32,
    /// Recovered by a hard reset after the abort went unanswered.
    pub reset: u32,
    /// Reset failed too; the subsystem reset was requested.
    pub escalated: u32,
}

/// Status words handed from interrupt context to the deferred context.
pub(crate) struct IrqFifo {
    pending: IrqLock<Deque<u32, STATUS_FIFO_DEPTH>>,
    doorbell: Mutex<()>,
    cv: Condvar,
}

impl IrqFifo {
    fn new() -> Self {
        Self {
            pending: IrqLock::new(Deque::new()),
            doorbell: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Queues a status word. Never blocks; on overflow the word is merged
    /// into the newest entry.
    pub(crate) fn push(&self, raw: u32) {
        {
            let mut pending = self.pending.lock();
            if let Err(raw) = pending.push_back(raw) {
                if let Some(last) = pending.back_mut() {
                    *last |= raw;
                }
            }
        }
        self.cv.notify_all();
    }

    pub(crate) fn pop(&self) -> Option<u32> {
        self.pending.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Sleeps until a status word is queued or `deadline` passes.
    ///
    /// The top half notifies without taking the doorbell, so a wakeup can
    /// slip between the emptiness check and the wait; callers loop with a
    /// short deadline.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = self.doorbell.lock();
        if !self.is_empty() {
            return true;
        }
        self.cv.wait_until(&mut guard, deadline);
        !self.is_empty()
    }
}

/// Mutable state of one core, owned by its deferred context.
pub(crate) struct CoreCtx {
    pub(crate) state: CoreState,
    pub(crate) power_held: bool,
    pub(crate) power_gen: u64,
    pub(crate) coalescer: IrqCoalescer,
    pub(crate) watchdog: Timer,
    pub(crate) slice: Timer,
    pub(crate) slice_target: Option<usize>,
    pub(crate) abort: Option<AbortReason>,
    pub(crate) abort_confirmed: bool,
    pub(crate) skip_confirmed: bool,
    pub(crate) recovery: RecoveryCounts,
}

pub(crate) struct Core {
    pub(crate) id: CoreId,
    pub(crate) class: ModuleClass,
    pub(crate) static_config: u32,
    pub(crate) regs: Arc<dyn RegisterBlock>,
    pub(crate) ctx: Mutex<CoreCtx>,
    pub(crate) irq: IrqFifo,
}

impl Core {
    pub(crate) fn new(
        id: CoreId,
        class: ModuleClass,
        static_config: u32,
        regs: Arc<dyn RegisterBlock>,
        coalesce: u32,
    ) -> Self {
        Self {
            id,
            class,
            static_config,
            regs,
            ctx: Mutex::new(CoreCtx {
                state: CoreState::PoweredOff,
                power_held: false,
                power_gen: 0,
                coalescer: IrqCoalescer::new(coalesce),
                watchdog: Timer::default(),
                slice: Timer::default(),
                slice_target: None,
                abort: None,
                abort_confirmed: false,
                skip_confirmed: false,
                recovery: RecoveryCounts::default(),
            }),
            irq: IrqFifo::new(),
        }
    }

    /// Interrupt top half: latch the cause, acknowledge it, wake the
    /// deferred context. No allocation, no sleeping lock.
    pub(crate) fn top_half(&self) {
        let raw = self.regs.read(REG_INT_STATUS);
        if raw == 0 {
            return;
        }
        self.irq.push(raw);
        self.regs.write(REG_INT_STATUS, raw);
    }

    pub(crate) fn hw_busy(&self) -> bool {
        self.regs.state().contains(HwState::BUSY)
    }

    /// No execution, no latched cause and nothing queued for the bottom half.
    pub(crate) fn quiescent(&self) -> bool {
        !self.hw_busy() && self.regs.read(REG_INT_STATUS) == 0 && self.irq.is_empty()
    }

    pub(crate) fn cur_addr(&self) -> u64 {
        self.regs.read(REG_CUR_ADDR) as u64
    }

    pub(crate) fn control(&self, ctrl: Ctrl) {
        self.regs.write(REG_CTRL, ctrl.bits());
    }

    pub(crate) fn start(&self, addr: u64, len_words: usize, ready: usize) {
        self.regs.write(REG_CMD_ADDR, addr as u32);
        self.regs.write(REG_CMD_LEN, len_words as u32);
        self.regs.write(REG_READY_COUNT, ready as u32);
        self.control(Ctrl::START);
    }

    pub(crate) fn set_ready_count(&self, ready: usize) {
        self.regs.write(REG_READY_COUNT, ready as u32);
    }

    pub(crate) fn program_static(&self) {
        self.regs.write(REG_CONFIG, self.static_config);
    }

    pub(crate) fn snapshot(&self) -> [u32; REG_COUNT] {
        let mut regs = [0; REG_COUNT];
        for (reg, value) in regs.iter_mut().enumerate() {
            *value = self.regs.read(reg);
        }
        regs
    }
}
