//! Optional binary trace records.
//!
//! The hook receives a record id, a small payload and a timestamp request
//! flag. Hook failures never affect scheduling.

use std::sync::Arc;

pub type TraceError = core::convert::Infallible;

pub type TraceResult = Result<(), TraceError>;

pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Record: core state change `[core, old, new]`.
pub const MCQ_CORE_STATE: u8 = 70;
/// Record: buffer linked `[core, slot_lo, slot_hi, priority]`.
pub const MCQ_BUF_LINK: u8 = 71;
/// Record: buffer completed `[core, slot_lo, slot_hi, tag]`.
pub const MCQ_BUF_DONE: u8 = 72;
/// Record: watchdog armed `[core, ticks(8 LE)]`.
pub const MCQ_WDOG_ARM: u8 = 73;
/// Record: watchdog disarmed `[core]`.
pub const MCQ_WDOG_DISARM: u8 = 74;
/// Record: watchdog expired `[core]`.
pub const MCQ_WDOG_EXPIRE: u8 = 75;
/// Record: recovery path taken `[core, path]`, path 0 = abort, 1 = reset, 2 = escalated.
pub const MCQ_RECOVERY: u8 = 76;
/// Record: preemption `[core, slot_lo, slot_hi]` of the displaced buffer.
pub const MCQ_PREEMPT: u8 = 77;

#[derive(Clone, Default)]
pub(crate) struct Tracer {
    hook: Option<TraceHook>,
}

impl Tracer {
    pub(crate) fn new(hook: Option<TraceHook>) -> Self {
        Self { hook }
    }

    pub(crate) fn emit(&self, record: u8, payload: &[u8]) {
        if let Some(hook) = &self.hook {
            let _ = hook(record, payload, true);
        }
    }
}
